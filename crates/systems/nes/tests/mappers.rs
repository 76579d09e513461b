//! Board selection by iNES mapper id.

mod common;

use nestor_nes::{Cartridge, CartridgeError, Console, Mapper, NesError};

#[test]
fn test_mapper_zero_is_nrom() {
    let console = Console::new(common::cartridge(&common::nrom_rom())).unwrap();
    assert!(matches!(console.mapper(), Mapper::Nrom(_)));
    assert_eq!(console.mapper().id(), 0);
}

#[test]
fn test_unknown_mapper_is_a_load_error() {
    // MMC5 parses fine as a file but has no board behind it
    let cart = Cartridge::from_bytes(&common::rom(5, false)).unwrap();
    assert_eq!(cart.mapper_id, 5);
    assert!(matches!(
        cart.check_supported(),
        Err(CartridgeError::UnsupportedMapper(5))
    ));
    assert!(matches!(
        Console::new(cart),
        Err(NesError::Cartridge(CartridgeError::UnsupportedMapper(5)))
    ));
}

#[test]
fn test_every_supported_board_boots_the_program() {
    for id in Mapper::SUPPORTED {
        let mut console = Console::new(common::cartridge(&common::rom(id, false)))
            .unwrap_or_else(|e| panic!("mapper {}: {}", id, e));
        console.reset();
        assert_eq!(console.cpu().registers().pc, 0x8000, "mapper {}", id);
        for _ in 0..4 {
            console.step_frame();
        }
        assert!(console.ram()[0x01] >= 3, "mapper {} took no NMIs", id);
        assert_eq!(console.mapper().id(), id);
    }
}
