// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

#![expect(missing_docs)]

fn main() {
    println!("cargo:rerun-if-changed=build.rs");
    println!("cargo:rerun-if-env-changed=SOURCE_DATE_EPOCH");

    // Honor reproducible-build timestamps when present.
    let timestamp = match std::env::var("SOURCE_DATE_EPOCH") {
        Ok(epoch) => {
            let seconds = epoch
                .trim()
                .parse::<i64>()
                .expect("SOURCE_DATE_EPOCH must be an integer");
            jiff::Timestamp::from_second(seconds).expect("SOURCE_DATE_EPOCH out of range")
        }
        Err(_) => jiff::Timestamp::now(),
    };
    let date = timestamp.to_zoned(jiff::tz::TimeZone::UTC).date();
    println!("cargo:rustc-env=GUARD_PAGES_CONFIG_BUILD_DATE={date}");
}
