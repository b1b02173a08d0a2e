//! Inbound authentication and on-behalf-of token handling.
//!
//! The inbound bearer token is exchanged for a downstream-scoped token, which lives in a
//! per-request [`TokenCarrier`] until the request ends.

mod bearer;
mod carrier;
mod exchange;
mod token;

pub use bearer::extract_bearer_token;
pub use carrier::{CarrierScope, TokenCarrier};
pub use exchange::{ExchangeError, OboTokenExchanger, TokenExchanger, JWT_BEARER_GRANT};
pub use token::AccessToken;
