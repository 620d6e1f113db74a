#[macro_export]
macro_rules! ceil_div {
    ($x:expr, $y:expr) => {{
        ($x + $y - 1) / $y
    }};
}
