#![allow(clippy::print_stdout)]
//! Basic usage example for pidguard
//!
//! Run it twice from two terminals: the second instance is refused while the
//! first one is working, and succeeds once the first one exits.

use pidguard::{AcquireError, InstanceLock};
use std::env;
use std::process;
use std::thread;
use std::time::Duration;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // NOTE: In production, consider using /var/run or /run/lock/ on Linux systems.
    let lock_path = env::temp_dir().join("pidguard_basic_usage.pid");
    println!("Attempting to acquire lock at: {:?}", lock_path);

    let lock = InstanceLock::new(&lock_path)?;
    println!("This program identifies as {:?}", lock.identity());

    let guard = match lock.acquire() {
        Ok(guard) => guard,
        Err(AcquireError::AlreadyRunning { pid }) => {
            println!("Another instance is already running as PID {}", pid);
            process::exit(1);
        }
        Err(e) => {
            eprintln!("Failed to acquire lock: {}", e);
            process::exit(1);
        }
    };
    println!("Lock acquired! Process ID: {}", lock.pid());

    for i in 1..=5 {
        println!("Working... {}/5", i);
        thread::sleep(Duration::from_secs(1));
    }

    guard.release();
    assert!(!lock_path.exists());
    println!("Lock released, lock file removed");
    Ok(())
}
