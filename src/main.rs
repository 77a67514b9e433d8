// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

mod args;

use args::Args;
use clap::Parser;
use edgefirst_ydlidar::{
    driver::{DriverConfig, LidarDriver},
    lidar::Error,
};
use std::sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
};
use tracing::{error, info, warn};

#[tokio::main]
async fn main() -> Result<(), Error> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_max_level(args.rust_log)
        .with_writer(std::io::stderr)
        .init();

    let running = Arc::new(AtomicBool::new(true));
    {
        let running = running.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("interrupted, stopping");
                running.store(false, Ordering::Relaxed);
            }
        });
    }

    match tokio::task::spawn_blocking(move || run(&args, &running)).await {
        Ok(result) => result,
        Err(err) => {
            error!("capture task failed: {}", err);
            Err(Error::ThreadPanic)
        }
    }
}

fn run(args: &Args, running: &AtomicBool) -> Result<(), Error> {
    let config = DriverConfig::from(args);
    let timeout = config.data_timeout;
    let driver = LidarDriver::new(config);

    if let Err(err) = driver.connect() {
        error!(
            "failed to connect to {}: {} ({})",
            config.command_addr(),
            err,
            driver.describe_error()
        );
        return Err(err);
    }

    if let Some(hz) = args.scan_frequency {
        if config.model.supports_scan_frequency(hz) {
            let value = driver.set_scan_frequency(hz)?;
            info!("scan frequency set to {}", value);
        } else {
            warn!("{} does not support a scan frequency of {} Hz", config.model, hz);
        }
    }

    if let Some(rate) = args.sample_rate {
        let value = driver.set_sampling_rate(rate)?;
        info!("sampling rate set to {}", value);
    }

    driver.start_scan()?;

    let mut count = 0usize;
    let result = loop {
        if !running.load(Ordering::Relaxed) {
            break Ok(());
        }

        match driver.grab_scan(timeout) {
            Ok(scan) => {
                count += 1;
                if args.json {
                    println!("{}", serde_json::to_string(&scan)?);
                } else {
                    info!(
                        "scan {}: {} points in {:.3} s",
                        count,
                        scan.len(),
                        scan.config.scan_time
                    );
                }

                if args.scans.is_some_and(|limit| count >= limit) {
                    break Ok(());
                }
            }
            Err(Error::Timeout) => {
                warn!("no scan within {:?} ({})", timeout, driver.describe_error());
            }
            Err(err) => {
                error!("scanning failed: {} ({})", err, driver.describe_error());
                break Err(err);
            }
        }
    };

    for (id, model) in driver.list_devices() {
        info!("discovered {} model {}", id, model);
    }

    if let Err(err) = driver.stop_scan() {
        warn!("stop scan: {}", err);
    }
    driver.disconnect();

    result
}
