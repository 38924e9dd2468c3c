//! Gateway protocol: canonical encoding, signing, outbound requests and
//! inbound callback validation.

pub mod callback;
pub mod encoding;
pub mod error;
pub mod request_builder;
pub mod signer;
pub mod types;

pub use callback::CallbackValidator;
pub use encoding::GatewayParams;
pub use error::{PaymentError, PaymentResult};
pub use request_builder::PaymentRequestBuilder;
pub use signer::{HashSecret, Signer};
pub use types::{
    CallbackChannel, CallbackFields, CallbackValidation, CreatePaymentRequest, GatewayAck,
    OutboundPayment, PaymentOrder, PaymentStatus,
};
