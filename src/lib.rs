//! Jog a robot motion group with a gamepad.
//!
//! The gamepad reader ([`controller`]) feeds decoded input batches into a
//! jogging session ([`jogging`]), which turns them into a stream of motion
//! commands over a [`transport`]. [`mqtt`] provides the networked transport,
//! [`cell`] selects and readies the motion group.

pub mod cell;
pub mod config;
pub mod controller;
pub mod jogging;
pub mod mqtt;
pub mod transport;
