//! Domain layer: payment value objects, the session state machine, and the
//! ports through which the controller talks to the gateway and the host UI.

pub mod payment;
pub mod ports;
pub mod session;
