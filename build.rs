// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

fn main() {
    println!(r#"cargo:rustc-check-cfg=cfg(periph_has_native_rmw)"#);

    let target = std::env::var("TARGET").unwrap_or_default();
    if target.starts_with("thumbv6m") {
        // ARMv6-M has no atomic read-modify-write instructions; the
        // polyfills fall back to critical sections.
    } else {
        println!("cargo:rustc-cfg=periph_has_native_rmw");
    }
}
