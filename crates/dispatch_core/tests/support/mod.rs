#![allow(dead_code)]

pub mod bus;
pub mod harness;
