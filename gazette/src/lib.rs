pub mod controller;

pub use controller::{Gazette, find_config_file, load_config};
