// ze-gdbserver - remote debug stub for Intel GPU compute devices
// Copyright (C) 2026 Andrii Shylenko
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

//! Command-line entry point : attach to every visible Intel
//! GPU compute device, quiesce them, then serve exactly one GDB remote
//! session over TCP before exiting.

use clap::Parser;
use std::net::TcpListener;
use std::process::ExitCode;

use zegdb_core::backend::IntelGtBackend;
use zegdb_core::config::AttachConfig;
use zegdb_core::device::DeviceManager;

const EXIT_OK: u8 = 0;
const EXIT_ATTACH_FAILED: u8 = 1;
const EXIT_SERVER_ERROR: u8 = 2;

#[derive(Parser, Debug)]
#[command(author, version, about = "Intel GPU remote debug stub", long_about = None)]
struct Cli {
    /// TCP port to listen on for the incoming GDB connection.
    #[arg(short, long, default_value = "2345")]
    port: u16,

    /// Enable `QNonStop` mode instead of the default all-stop behavior.
    #[arg(long)]
    non_stop: bool,

    /// Enable debug-level tracing.
    #[arg(short, long)]
    verbose: bool,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_max_level(if cli.verbose { tracing::Level::DEBUG } else { tracing::Level::INFO })
        .init();

    let driver = make_driver();
    let mut manager = DeviceManager::new(driver, Box::new(IntelGtBackend), AttachConfig::from_env());
    manager.set_non_stop(cli.non_stop);

    if let Err(e) = manager.attach() {
        tracing::error!(error = %e, "failed to attach to any device");
        return ExitCode::from(EXIT_ATTACH_FAILED);
    }
    tracing::info!(devices = manager.devices().len(), "attached");
    manager.post_attach_quiesce();

    let listener = match TcpListener::bind(("0.0.0.0", cli.port)) {
        Ok(l) => l,
        Err(e) => {
            tracing::error!(port = cli.port, error = %e, "failed to bind");
            return ExitCode::from(EXIT_SERVER_ERROR);
        }
    };
    tracing::info!(port = cli.port, "listening for a GDB connection");

    let (stream, addr) = match listener.accept() {
        Ok(pair) => pair,
        Err(e) => {
            tracing::error!(error = %e, "failed to accept connection");
            return ExitCode::from(EXIT_SERVER_ERROR);
        }
    };
    tracing::info!(%addr, "client connected");

    let conn: Box<dyn gdbstub::conn::ConnectionExt<Error = std::io::Error>> = Box::new(stream);
    match zegdb_stub::serve(manager, conn) {
        Ok(()) => ExitCode::from(EXIT_OK),
        Err(e) => {
            tracing::error!(error = %e, "gdb session ended with an error");
            ExitCode::from(EXIT_SERVER_ERROR)
        }
    }
}

#[cfg(feature = "vendor-ffi")]
fn make_driver() -> Box<dyn zegdb_core::DebugDriver> {
    Box::new(zegdb_core::driver::vendor::VendorDriver::new())
}

#[cfg(not(feature = "vendor-ffi"))]
fn make_driver() -> Box<dyn zegdb_core::DebugDriver> {
    tracing::warn!("built without vendor-ffi: serving a synthetic single-device fake");
    let driver = zegdb_core::driver::fake::FakeDriver::new();
    driver.add_device(
        zegdb_core::driver::DeviceProperties {
            name: "Fake Intel GT".into(),
            vendor_id: 0x8086,
            device_id: 0x0000,
            pci_slot: "0000:00:02.0".into(),
            slices: 1,
            subslices_per_slice: 1,
            eus_per_subslice: 1,
            threads_per_eu: 1,
            is_subdevice: false,
            subdevice_id: None,
        },
        vec![
            zegdb_core::driver::RegsetDescriptor {
                kind: zegdb_core::driver::RegsetKind::Grf,
                type_code: 0,
                byte_size: 4,
                bit_size: 32,
                count: 128,
                writable: true,
            },
            zegdb_core::driver::RegsetDescriptor {
                kind: zegdb_core::driver::RegsetKind::Ce,
                type_code: 3,
                byte_size: 4,
                bit_size: 32,
                count: 1,
                writable: true,
            },
            zegdb_core::driver::RegsetDescriptor {
                kind: zegdb_core::driver::RegsetKind::Cr,
                type_code: 5,
                byte_size: 4,
                bit_size: 32,
                count: 3,
                writable: true,
            },
            zegdb_core::driver::RegsetDescriptor {
                kind: zegdb_core::driver::RegsetKind::Sr,
                type_code: 4,
                byte_size: 4,
                bit_size: 32,
                count: 1,
                writable: true,
            },
            zegdb_core::driver::RegsetDescriptor {
                kind: zegdb_core::driver::RegsetKind::Sba,
                type_code: 10,
                byte_size: 8,
                bit_size: 64,
                count: 10,
                writable: false,
            },
        ],
    );
    Box::new(driver)
}
