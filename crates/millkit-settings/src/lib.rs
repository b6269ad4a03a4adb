//! MillKit Settings Crate
//!
//! Handles application configuration and the small files MillKit keeps
//! between runs: the controller-settings mirror and the last-known port.

pub mod config;
pub mod persistence;

pub use config::{
    default_data_dir, ConnectionSettings, MillConfig, MotionSettings, PathSettings,
    SessionSettings, TimingSettings,
};
pub use persistence::{PortHintStore, SettingsMirror};
