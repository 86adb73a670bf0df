pub mod factory;

pub use factory::{AdapterFactory, BuiltAdapter, SimulatedAdapterFactory};
