pub mod acquisition;
pub mod device;
pub mod output;
pub mod plot;
pub mod registry;
pub mod sampler;
pub mod shell;
pub mod sim;
