pub mod consts;
pub mod error;
pub mod frame;
pub mod register;
pub mod quality;
pub mod calibrate;
pub mod stack;
pub mod pipeline;
