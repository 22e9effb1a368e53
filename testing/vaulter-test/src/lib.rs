// Copyright 2024 The Matrix.org Foundation C.I.C.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

#![doc = include_str!("../README.md")]

pub mod test_json;
pub mod vectors;

#[doc(hidden)]
pub mod __macro_support {
    pub use ctor;
    pub use tracing_subscriber;
}

/// Install a `tracing` subscriber for the test binary of the calling crate.
///
/// The subscriber writes through the test writer, so the output is only shown
/// for failing tests. The filter can be overridden with `RUST_LOG`.
#[macro_export]
macro_rules! init_tracing_for_tests {
    () => {
        #[$crate::__macro_support::ctor::ctor]
        fn init_logging() {
            use $crate::__macro_support::tracing_subscriber::{
                self, layer::SubscriberExt, util::SubscriberInitExt,
            };

            tracing_subscriber::registry()
                .with(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                    "info,vaulter_crypto=trace,vaulter_backup=trace".into()
                }))
                .with(tracing_subscriber::fmt::layer().with_test_writer())
                .init();
        }
    };
}
