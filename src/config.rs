use crate::constants::DEFAULT_TRACKER_PORT;
use crate::endpoint::TrackerEndpoint;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[clap(author, version, about, long_about = None)]
pub struct Config {
    #[clap(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run a tracker
    Tracker {
        /// port to listen on
        #[clap(short, long, value_parser, default_value_t = DEFAULT_TRACKER_PORT)]
        port: u16,
    },
    /// Share an existing local file with the swarm
    Seed {
        /// file to share
        #[clap(value_parser)]
        file: PathBuf,

        /// trackers to register with (host:port)
        #[clap(value_parser, required = true)]
        trackers: Vec<TrackerEndpoint>,

        /// name the swarm knows the file by (defaults to the file's name)
        #[clap(short, long, value_parser)]
        name: Option<String>,

        /// data port to serve blocks on (0 picks an ephemeral one)
        #[clap(short, long, value_parser, default_value_t = 0)]
        data_port: u16,
    },
    /// Fetch a named file from the swarm
    Download {
        /// name of the file in the swarm
        #[clap(value_parser)]
        name: String,

        /// where to store the file locally
        #[clap(value_parser)]
        output: PathBuf,

        /// trackers to query (host:port)
        #[clap(value_parser, required = true)]
        trackers: Vec<TrackerEndpoint>,

        /// data port to serve blocks on (0 picks an ephemeral one)
        #[clap(short, long, value_parser, default_value_t = 0)]
        data_port: u16,
    },
}

impl Config {
    pub fn new() -> Config {
        Config::parse()
    }
}
