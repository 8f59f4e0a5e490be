// Copyright 2020-2024 IOTA Stiftung
// SPDX-License-Identifier: Apache-2.0

mod builder;
mod decoder;
mod disclosable;
mod disclosure;
mod encoder;
mod error;
mod hasher;
mod jwt;
mod key_binding;
mod salt;
mod sd_jwt;
mod signer;

pub use builder::*;
pub use decoder::*;
pub use disclosable::*;
pub use disclosure::*;
pub use encoder::*;
pub use error::*;
pub use hasher::*;
pub use jwt::*;
pub use key_binding::*;
pub use salt::*;
pub use sd_jwt::*;
pub use signer::*;
