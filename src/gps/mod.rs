// src/gps/mod.rs
//! Reading feeds: gpsd, NMEA serial receivers and recorded tracks

pub mod gpsd;
pub mod nmea;
pub mod replay;

pub use nmea::NmeaParser;
