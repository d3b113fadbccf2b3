use anyhow::Result;
use log::info;
use std::fs::File;
use std::io::Write;
use std::path::Path;

use sysinfo::System;

/// Write a snapshot of the host into the output directory, so results can
/// later be tied back to the machine that produced them.
pub fn dump_sys_info(file: &Path) -> Result<()> {
    info!("Writing host info to {file:?}");
    let mut file = File::create(file)?;
    let mut sys = System::new_all();
    sys.refresh_all();

    let unknown = || "<unknown>".to_owned();
    writeln!(file, "os:         {}", System::long_os_version().unwrap_or_else(unknown))?;
    writeln!(file, "kernel:     {}", System::kernel_version().unwrap_or_else(unknown))?;
    writeln!(file, "hostname:   {}", System::host_name().unwrap_or_else(unknown))?;
    writeln!(file, "arch:       {}", System::cpu_arch())?;

    let cpus = sys.cpus();
    if let Some(cpu) = cpus.first() {
        writeln!(
            file,
            "cpu:        {} x{} @ {:.2} GHz",
            cpu.brand(),
            cpus.len(),
            cpu.frequency() as f64 / 1000.0
        )?;
    } else {
        writeln!(file, "cpu:        <unknown>")?;
    }

    writeln!(file, "memory:     {} bytes total", sys.total_memory())?;
    writeln!(file, "swap:       {} bytes total", sys.total_swap())?;
    writeln!(file, "uptime:     {} seconds", System::uptime())?;

    Ok(())
}
