//! Session lifecycle against a scratch save directory.

mod common;

use std::fs;

use nestor_nes::{rom_hash, Console, Session, SessionPaths, StartKind};

fn console_for(rom: &[u8]) -> Console {
    Console::new(common::cartridge(rom)).unwrap()
}

#[test]
fn test_battery_ram_round_trips_through_disk() {
    let dir = common::scratch_dir("session-battery");
    let paths = SessionPaths::new(&dir);
    let rom = common::rom(0, true);
    let hash = rom_hash(&rom);

    let sram_len = console_for(&rom).cartridge().sram.len();
    let image: Vec<u8> = (0..sram_len).map(|i| (i % 251) as u8).collect();
    fs::create_dir_all(paths.sram_path(&hash).parent().unwrap()).unwrap();
    fs::write(paths.sram_path(&hash), &image).unwrap();

    let mut session = Session::start(console_for(&rom), hash.clone(), paths.clone(), true);
    assert_eq!(session.start_kind(), StartKind::Booted);
    assert_eq!(session.console().cartridge().sram, image);

    session.console_mut().step_frame();
    let sram = session.console().cartridge().sram.clone();
    let console = session.end().unwrap();
    assert_eq!(fs::read(paths.sram_path(&hash)).unwrap(), sram);
    assert!(paths.state_path(&hash).exists());

    let resumed = Session::start(console_for(&rom), hash.clone(), paths.clone(), true);
    assert_eq!(resumed.start_kind(), StartKind::Resumed);
    assert_eq!(resumed.console().save_state(), console.save_state());

    let _ = fs::remove_dir_all(&dir);
}

#[test]
fn test_odd_sized_battery_file_keeps_its_size() {
    let dir = common::scratch_dir("session-battery-odd");
    let paths = SessionPaths::new(&dir);
    let rom = common::rom(0, true);
    let hash = rom_hash(&rom);

    let image: Vec<u8> = (0..100u8).map(|i| i.wrapping_mul(7)).collect();
    fs::create_dir_all(paths.sram_path(&hash).parent().unwrap()).unwrap();
    fs::write(paths.sram_path(&hash), &image).unwrap();

    let mut session = Session::start(console_for(&rom), hash.clone(), paths.clone(), true);
    assert_eq!(session.console().cartridge().sram, image);
    assert_eq!(session.console().cartridge().read_sram(0x6000 + 99), image[99]);
    assert_eq!(session.console().cartridge().read_sram(0x6000 + 100), 0);

    session.console_mut().step_frame();
    let sram = session.console().cartridge().sram.clone();
    session.end().unwrap();
    let written = fs::read(paths.sram_path(&hash)).unwrap();
    assert_eq!(written.len(), 100);
    assert_eq!(written, sram);

    let _ = fs::remove_dir_all(&dir);
}

#[test]
fn test_fresh_start_ignores_save_state() {
    let dir = common::scratch_dir("session-fresh");
    let paths = SessionPaths::new(&dir);
    let rom = common::nrom_rom();
    let hash = rom_hash(&rom);

    let mut session = Session::start(console_for(&rom), hash.clone(), paths.clone(), true);
    session.console_mut().step_frame();
    session.end().unwrap();

    let session = Session::start(console_for(&rom), hash, paths, false);
    assert_eq!(session.start_kind(), StartKind::Booted);
    assert_eq!(session.console().frame_count(), 0);

    let _ = fs::remove_dir_all(&dir);
}

#[test]
fn test_corrupt_state_falls_back_to_boot() {
    let dir = common::scratch_dir("session-corrupt");
    let paths = SessionPaths::new(&dir);
    let rom = common::rom(0, true);
    let hash = rom_hash(&rom);

    fs::create_dir_all(paths.state_path(&hash).parent().unwrap()).unwrap();
    fs::write(paths.state_path(&hash), b"NSTS\x02\x00garbage").unwrap();
    fs::create_dir_all(paths.sram_path(&hash).parent().unwrap()).unwrap();
    fs::write(paths.sram_path(&hash), [9u8, 8, 7]).unwrap();

    let session = Session::start(console_for(&rom), hash, paths, true);
    assert_eq!(session.start_kind(), StartKind::Booted);
    assert_eq!(session.console().cpu().registers().pc, 0x8000);
    assert_eq!(session.console().cartridge().sram, vec![9, 8, 7]);

    let _ = fs::remove_dir_all(&dir);
}

#[test]
fn test_cartridge_without_battery_writes_no_sram() {
    let dir = common::scratch_dir("session-nobattery");
    let paths = SessionPaths::new(&dir);
    let rom = common::nrom_rom();
    let hash = rom_hash(&rom);

    let session = Session::start(console_for(&rom), hash.clone(), paths.clone(), true);
    session.end().unwrap();
    assert!(!paths.sram_path(&hash).exists());
    assert!(paths.state_path(&hash).exists());

    let _ = fs::remove_dir_all(&dir);
}
