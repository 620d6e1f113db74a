use crate::ceil_div;
use serde::de::{SeqAccess, Visitor};
use serde::ser::SerializeTuple;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;

/// Packed bit vector tracking which blocks of a file are held. Bit layout is
/// MSB-first within each byte; bits past `len` in the last byte stay zero.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Bitmap {
    data: Vec<u8>,
    len: usize,
}

impl Bitmap {
    pub fn new(len: usize) -> Self {
        Self {
            data: vec![0; ceil_div!(len, 8)],
            len,
        }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn get(&self, idx: usize) -> bool {
        assert!(idx < self.len, "bit {} out of range {}", idx, self.len);

        self.data[idx / 8] & Self::mask(idx) > 0
    }

    /// Sets bit `idx` and returns its previous value.
    pub fn set(&mut self, idx: usize) -> bool {
        assert!(idx < self.len, "bit {} out of range {}", idx, self.len);

        let prev = self.data[idx / 8] & Self::mask(idx) > 0;
        self.data[idx / 8] |= Self::mask(idx);

        prev
    }

    pub fn clear(&mut self, idx: usize) {
        assert!(idx < self.len, "bit {} out of range {}", idx, self.len);

        self.data[idx / 8] &= !Self::mask(idx);
    }

    pub fn set_all(&mut self) {
        for byte in self.data.iter_mut() {
            *byte = 0xff;
        }

        self.zero_tail();
    }

    pub fn weight(&self) -> usize {
        self.data.iter().map(|byte| byte.count_ones() as usize).sum()
    }

    pub fn is_full(&self) -> bool {
        self.weight() == self.len
    }

    /// Indices of set bits, ascending.
    pub fn ones(&self) -> impl Iterator<Item = usize> + '_ {
        (0..self.len).filter(|idx| self.get(*idx))
    }

    fn mask(idx: usize) -> u8 {
        0b1000_0000 >> (idx % 8)
    }

    fn zero_tail(&mut self) {
        let tail_bits = self.len % 8;

        if tail_bits > 0 {
            let last = self.data.len() - 1;
            self.data[last] &= !(0xffu8 >> tail_bits);
        }
    }
}

impl Serialize for Bitmap {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let mut tup = serializer.serialize_tuple(2)?;
        tup.serialize_element(&(self.len as u64))?;
        tup.serialize_element(&self.data)?;
        tup.end()
    }
}

impl<'de> Deserialize<'de> for Bitmap {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        struct BitmapVisitor;

        impl<'de> Visitor<'de> for BitmapVisitor {
            type Value = Bitmap;

            fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
                formatter.write_str("bit count followed by packed bytes")
            }

            fn visit_seq<A>(self, mut seq: A) -> Result<Self::Value, A::Error>
            where
                A: SeqAccess<'de>,
            {
                let len: u64 = seq
                    .next_element()?
                    .ok_or_else(|| serde::de::Error::invalid_length(0, &self))?;
                let data: Vec<u8> = seq
                    .next_element()?
                    .ok_or_else(|| serde::de::Error::invalid_length(1, &self))?;

                let len = len as usize;

                if data.len() != ceil_div!(len, 8) {
                    return Err(serde::de::Error::custom(format!(
                        "bitmap of {} bits needs {} bytes, got {}",
                        len,
                        ceil_div!(len, 8),
                        data.len()
                    )));
                }

                let tail_bits = len % 8;
                if tail_bits > 0 && data[data.len() - 1] & (0xffu8 >> tail_bits) != 0 {
                    return Err(serde::de::Error::custom("bitmap has bits past its length"));
                }

                Ok(Bitmap { data, len })
            }
        }

        deserializer.deserialize_tuple(2, BitmapVisitor)
    }
}
