pub mod intake_actor;
pub mod supervisor;
pub mod trading_actor;

pub use common::actors::{Actor, ActorType, ControlMessage};
