// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

use clap::Parser;
use edgefirst_ydlidar::{driver::DriverConfig, protocol::LidarModel, scan::ScanLimits};
use std::{net::IpAddr, time::Duration};
use tracing::level_filters::LevelFilter;

#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// IP address of the LiDAR.
    #[arg(env, default_value = "192.168.0.11")]
    pub target: IpAddr,

    /// LiDAR model, selects the wire framing.
    #[arg(long, env, default_value = "tea")]
    pub model: LidarModel,

    /// Device TCP command port.
    #[arg(long, env, default_value = "8090")]
    pub command_port: u16,

    /// Local UDP port receiving scan data.
    #[arg(long, env, default_value = "8000")]
    pub data_port: u16,

    /// Local UDP port receiving discovery broadcasts.
    #[arg(long, env, default_value = "8001")]
    pub discovery_port: u16,

    /// Scan frequency in Hz.  Only applied on models that support it.
    #[arg(long, env)]
    pub scan_frequency: Option<f32>,

    /// Sampling rate to configure before scanning.
    #[arg(long, env)]
    pub sample_rate: Option<i32>,

    /// Receive timeout in milliseconds, also used when waiting for a scan.
    #[arg(long, env, default_value = "2000")]
    pub timeout: u64,

    /// Do not reconnect when the data stream stops.
    #[arg(long, env)]
    pub no_auto_reconnect: bool,

    /// Reported angle limits in degrees.
    #[arg(
        long,
        env,
        num_args = 2,
        value_names = ["MIN", "MAX"],
        value_delimiter = ' ',
        default_value = "30 330"
    )]
    pub angle: Vec<f32>,

    /// Reported range limits in metres.
    #[arg(
        long,
        env,
        num_args = 2,
        value_names = ["MIN", "MAX"],
        value_delimiter = ' ',
        default_value = "0.01 64"
    )]
    pub range: Vec<f32>,

    /// Stop after this many scans.
    #[arg(long, env)]
    pub scans: Option<usize>,

    /// Print every scan as a JSON line on stdout.
    #[arg(long, env)]
    pub json: bool,

    /// Application log level
    #[arg(long, env, default_value = "info")]
    pub rust_log: LevelFilter,
}

impl From<&Args> for DriverConfig {
    fn from(args: &Args) -> Self {
        let defaults = DriverConfig::default();
        let timeout = Duration::from_millis(args.timeout);
        let limits = ScanLimits {
            min_angle: args.angle.first().copied().unwrap_or(defaults.limits.min_angle),
            max_angle: args.angle.get(1).copied().unwrap_or(defaults.limits.max_angle),
            min_range: args.range.first().copied().unwrap_or(defaults.limits.min_range),
            max_range: args.range.get(1).copied().unwrap_or(defaults.limits.max_range),
        };

        DriverConfig {
            address: args.target,
            command_port: args.command_port,
            data_port: args.data_port,
            discovery_port: args.discovery_port,
            model: args.model,
            data_timeout: timeout,
            auto_reconnect: !args.no_auto_reconnect,
            limits,
            ..defaults
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let args = Args::parse_from(["ydlidar"]);
        let config = DriverConfig::from(&args);
        assert_eq!(config, DriverConfig::default());
    }

    #[test]
    fn test_overrides() {
        let args = Args::parse_from([
            "ydlidar",
            "10.0.0.7",
            "--model",
            "tia",
            "--timeout",
            "500",
            "--no-auto-reconnect",
            "--angle",
            "0",
            "360",
        ]);
        let config = DriverConfig::from(&args);
        assert_eq!(config.command_addr().to_string(), "10.0.0.7:8090");
        assert_eq!(config.model, LidarModel::Tia);
        assert_eq!(config.data_timeout, Duration::from_millis(500));
        assert!(!config.auto_reconnect);
        assert_eq!(config.limits.field_of_view(), 360.0);
    }
}
