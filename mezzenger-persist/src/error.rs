// Copyright 2024 - developers of the `mezzenger` project.
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

use snafu::Snafu;
use std::path::PathBuf;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum PersistError {
    #[snafu(display("could not read persist file {path:?}"))]
    Read { path: PathBuf, source: std::io::Error },

    #[snafu(display("could not write persist file {path:?}"))]
    Write { path: PathBuf, source: std::io::Error },

    #[snafu(display("could not rename temporary snapshot into {path:?}"))]
    Rename { path: PathBuf, source: std::io::Error },

    #[snafu(display("persist file {path:?} is corrupt: {reason}"))]
    Corrupt { path: PathBuf, reason: String },
}
