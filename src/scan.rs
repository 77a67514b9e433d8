// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

//! Revolution to [`LaserScan`] conversion.

use crate::lidar::Sample;
use serde::Serialize;

/// Device timestamp ticks per second.
const TICKS_PER_SECOND: f64 = 1e7;

/// Configured field of view and range limits, in degrees and metres.
#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
pub struct ScanLimits {
    pub min_angle: f32,
    pub max_angle: f32,
    pub min_range: f32,
    pub max_range: f32,
}

impl ScanLimits {
    pub fn field_of_view(&self) -> f32 {
        self.max_angle - self.min_angle
    }
}

impl Default for ScanLimits {
    fn default() -> Self {
        Self {
            min_angle: 30.0,
            max_angle: 330.0,
            min_range: 0.01,
            max_range: 64.0,
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize)]
pub struct LaserPoint {
    /// Degrees
    pub angle: f32,
    /// Metres
    pub range: f32,
    pub intensity: f32,
}

/// Scan metadata. Angles in radians, times in seconds, ranges in metres.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize)]
pub struct LaserConfig {
    pub min_angle: f32,
    pub max_angle: f32,
    pub angle_increment: f32,
    pub time_increment: f32,
    pub scan_time: f32,
    pub min_range: f32,
    pub max_range: f32,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct LaserScan {
    /// Device time of the first sample.
    pub stamp: u64,
    /// Host monotonic time the revolution was published, in nanoseconds.
    pub host_stamp: u64,
    pub points: Vec<LaserPoint>,
    pub config: LaserConfig,
}

impl LaserScan {
    pub fn from_samples(samples: &[Sample], host_stamp: u64, limits: &ScanLimits) -> Self {
        let mut config = LaserConfig {
            min_angle: limits.min_angle.to_radians(),
            max_angle: limits.max_angle.to_radians(),
            min_range: limits.min_range,
            max_range: limits.max_range,
            ..Default::default()
        };

        let (Some(first), Some(last)) = (samples.first(), samples.last()) else {
            return Self {
                host_stamp,
                config,
                ..Default::default()
            };
        };

        let count = samples.len() as f32;
        config.scan_time =
            (last.timestamp.saturating_sub(first.timestamp) as f64 / TICKS_PER_SECOND) as f32;
        config.angle_increment = limits.field_of_view().to_radians() / count;
        config.time_increment = config.scan_time / count;

        let points = samples
            .iter()
            .map(|sample| LaserPoint {
                angle: sample.angle_degrees(),
                range: sample.range_meters(),
                intensity: sample.quality as f32,
            })
            .collect();

        Self {
            stamp: first.timestamp,
            host_stamp,
            points,
            config,
        }
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_samples() {
        let samples: Vec<Sample> = (0..4)
            .map(|i| Sample {
                angle: 9_000 + i * 50,
                distance: 2_000 + i,
                quality: 200,
                sync: i == 0,
                timestamp: 10_000_000 + i as u64 * 5_000_000,
            })
            .collect();

        let scan = LaserScan::from_samples(&samples, 77, &ScanLimits::default());
        assert_eq!(scan.len(), 4);
        assert_eq!(scan.stamp, 10_000_000);
        assert_eq!(scan.host_stamp, 77);

        let point = scan.points[1];
        assert!((point.angle - 90.5).abs() < 1e-4);
        assert!((point.range - 2.001).abs() < 1e-6);
        assert_eq!(point.intensity, 200.0);

        // 15e6 ticks at 1e7 ticks/s.
        assert!((scan.config.scan_time - 1.5).abs() < 1e-6);
        assert!((scan.config.time_increment - 0.375).abs() < 1e-6);
        assert!((scan.config.angle_increment - 300f32.to_radians() / 4.0).abs() < 1e-6);
        assert!((scan.config.max_angle - 330f32.to_radians()).abs() < 1e-6);
    }

    #[test]
    fn test_empty_revolution() {
        let scan = LaserScan::from_samples(&[], 5, &ScanLimits::default());
        assert!(scan.is_empty());
        assert_eq!(scan.config.scan_time, 0.0);
        assert_eq!(scan.config.angle_increment, 0.0);
        assert_eq!(scan.config.max_range, 64.0);
    }

    #[test]
    fn test_serializes_to_json() {
        let scan = LaserScan::from_samples(
            &[Sample {
                angle: 100,
                distance: 1000,
                ..Default::default()
            }],
            0,
            &ScanLimits::default(),
        );
        let json = serde_json::to_value(&scan).unwrap();
        assert_eq!(json["points"][0]["range"], 1.0);
    }
}
