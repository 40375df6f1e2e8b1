/*---------------------------------------------------------------------------------------------
 *  Copyright (c) Microsoft Corporation. All rights reserved.
 *  Licensed under the Apache License, Version 2.0. See LICENSE.txt in the project root for license information.
 *  This software incorporates material from third parties. See NOTICE.txt for details.
 *--------------------------------------------------------------------------------------------*/

mod deflate;
mod gzip;
mod rewriter;
mod rezip_error;
mod sliding_window;
mod slow_path;

pub use gzip::GzipHeader;

pub use rezip_error::ExitCode;
pub use rezip_error::{RezipError, Result};

pub use rewriter::{DynamicBlockPolicy, RezipConfig, RezipStats, RezipWriter};

#[cfg(test)]
static INIT: std::sync::Once = std::sync::Once::new();

/// Initialize the logger for tests. This is a no-op if the logger is already initialized.
#[cfg(test)]
pub fn init_logging() {
    INIT.call_once(|| {
        let _ = env_logger::builder().is_test(true).try_init();
    });
}
