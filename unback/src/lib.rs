extern crate clap;
extern crate ibackup;
extern crate rpassword;

pub mod cli;
pub mod error;
pub mod listing;
pub mod recovery;
pub mod utils;
