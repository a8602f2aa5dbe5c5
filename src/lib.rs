pub mod eeprom;
pub mod encoder;
pub mod interrupt;
pub mod peripheral;
pub mod runner;
pub mod util;
