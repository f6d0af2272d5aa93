// Copyright (c) 2024 Botho Foundation

//! Garlic messages: building, opening and dispatching cloves.

mod builder;
mod clove;
mod config;
mod dispatch;
mod error;
mod parser;
mod receiver;
mod validator;

pub use builder::{BuiltGarlic, GarlicMessageBuilder};
pub use clove::{CloveSet, GarlicClove, MAX_CLOVES};
pub use config::{random_id, CloveContents, GarlicConfig, ReplyBlock};
pub use dispatch::{CloveDispatcher, ReceiveScope, MAX_GARLIC_DEPTH};
pub use error::{GarlicError, GarlicResult, ReplayError};
pub use parser::GarlicMessageParser;
pub use receiver::{CloveReceiver, GarlicMessageReceiver};
pub use validator::{MessageValidator, CLOCK_FUDGE_FACTOR, MAX_MESSAGE_LIFETIME};
