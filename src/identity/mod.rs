mod error;
mod keys;
mod store;

pub use error::{internal_error, invalid_key, IdentityError, IdentityErrorCode, IdentityResult};
pub use keys::{
    decode_public_key_der, decode_secret_key_der, encode_public_key_der, encode_secret_key_der,
};
pub use store::IdentityStore;
