mod control;
mod op;
mod wire;

pub use control::ControlMsg;
pub use op::{Op, OrderedF64};
