// ze-gdbserver - remote debug stub for Intel GPU compute devices
// Copyright (C) 2026 Andrii Shylenko
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

use std::io::{Read, Write};
use std::net::{TcpListener, TcpStream};
use std::thread;
use std::time::Duration;

use zegdb_core::backend::IntelGtBackend;
use zegdb_core::config::AttachConfig;
use zegdb_core::driver::fake::FakeDriver;
use zegdb_core::driver::{DeviceProperties, RegsetDescriptor, RegsetKind};
use zegdb_core::device::DeviceManager;

fn props() -> DeviceProperties {
    DeviceProperties {
        name: "Test GPU".into(),
        vendor_id: 0x8086,
        device_id: 0x1234,
        pci_slot: "0000:00:02.0".into(),
        slices: 1,
        subslices_per_slice: 1,
        eus_per_subslice: 1,
        threads_per_eu: 1,
        is_subdevice: false,
        subdevice_id: None,
    }
}

fn regsets() -> Vec<RegsetDescriptor> {
    vec![
        RegsetDescriptor { kind: RegsetKind::Grf, type_code: 0, byte_size: 4, bit_size: 32, count: 4, writable: true },
        RegsetDescriptor { kind: RegsetKind::Ce, type_code: 3, byte_size: 4, bit_size: 32, count: 1, writable: true },
        RegsetDescriptor { kind: RegsetKind::Cr, type_code: 5, byte_size: 4, bit_size: 32, count: 3, writable: true },
        RegsetDescriptor { kind: RegsetKind::Sr, type_code: 4, byte_size: 4, bit_size: 32, count: 1, writable: true },
        RegsetDescriptor { kind: RegsetKind::Sba, type_code: 10, byte_size: 8, bit_size: 64, count: 10, writable: false },
    ]
}

fn compute_checksum(data: &str) -> String {
    let sum: u8 = data.as_bytes().iter().fold(0, |acc, &x| acc.wrapping_add(x));
    format!("{:02x}", sum)
}

fn send_packet(stream: &mut TcpStream, data: &str) {
    let packet = format!("${}#{}", data, compute_checksum(data));
    stream.write_all(packet.as_bytes()).unwrap();
    stream.flush().unwrap();
}

fn read_packet(stream: &mut TcpStream) -> String {
    let mut buffer = [0; 2048];
    let mut response = String::new();
    let start = std::time::Instant::now();
    loop {
        if start.elapsed() > Duration::from_secs(2) {
            panic!("Timed out reading GDB packet. Data so far: {:?}", response);
        }
        match stream.read(&mut buffer) {
            Ok(0) => break,
            Ok(n) => response.push_str(&String::from_utf8_lossy(&buffer[..n])),
            Err(ref e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                thread::sleep(Duration::from_millis(10));
                continue;
            }
            Err(e) => panic!("Error reading GDB packet: {:?}", e),
        }

        if response == "+" {
            response.clear();
            continue;
        }
        if response.contains('$') && response.contains('#') {
            let hash_idx = response.find('#').unwrap();
            if response.len() >= hash_idx + 3 {
                break;
            }
        }
    }
    response
}

/// End-to-end smoke test over a real TCP socket: attach one fake device,
/// serve it, and drive a handful of RSP packets against it the way an
/// actual `gdb` client would ("the RSP dispatcher is an
/// external collaborator" — this is that collaborator's thinnest
/// possible stand-in).
#[test]
fn test_gdb_rsp_basic_commands() {
    let port = 9101;

    thread::spawn(move || {
        let driver = FakeDriver::new();
        driver.add_device(props(), regsets());
        let mut manager = DeviceManager::new(Box::new(driver), Box::new(IntelGtBackend), AttachConfig::default());
        manager.attach().unwrap();
        manager.post_attach_quiesce();

        let listener = TcpListener::bind(format!("127.0.0.1:{port}")).unwrap();
        let (stream, _addr) = listener.accept().unwrap();
        let conn: Box<dyn gdbstub::conn::ConnectionExt<Error = std::io::Error>> = Box::new(stream);
        zegdb_stub::serve(manager, conn).unwrap();
    });

    thread::sleep(Duration::from_millis(100));

    let mut stream = TcpStream::connect(format!("127.0.0.1:{port}")).unwrap();
    stream.set_read_timeout(Some(Duration::from_secs(1))).unwrap();
    stream.write_all(b"+").unwrap();

    // Register read ($p0): regno 0 is the first GRF register.
    send_packet(&mut stream, "p0");
    let resp = read_packet(&mut stream);
    assert!(!resp.contains("E"), "failed to read register 0: {resp}");

    // Memory read ($m): default address space, no thread context needed.
    send_packet(&mut stream, "m0,4");
    let resp = read_packet(&mut stream);
    assert!(!resp.contains("E01"), "memory read failed: {resp}");

    // Thread-alive query followed by a qfThreadInfo listing.
    send_packet(&mut stream, "qfThreadInfo");
    let resp = read_packet(&mut stream);
    assert!(resp.contains('m') || resp.contains('l'), "unexpected thread list reply: {resp}");
}
