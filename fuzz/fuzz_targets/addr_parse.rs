//! Fuzz target for server and invitation address parsing
//!
//! # Invariants
//!
//! - Parsing arbitrary strings never panics
//! - For plain host names, a parsed address formats to a URL that parses
//!   back to the same address, in both the `parsec3://` and the HTTP
//!   redirection forms

#![no_main]

use greet_proto::{InvitationAddr, ServerAddr};
use libfuzzer_sys::fuzz_target;

/// Parsing is lenient about host characters; formatting is only expected to
/// round-trip for DNS-style names.
fn plain_host(server: &ServerAddr) -> bool {
    server.hostname().bytes().all(|b| b.is_ascii_alphanumeric() || b == b'.' || b == b'-')
}

fuzz_target!(|input: &str| {
    if let Ok(server) = input.parse::<ServerAddr>() {
        if plain_host(&server) {
            let reparsed: ServerAddr = server.to_url().parse().expect("formatted server address must parse");
            assert_eq!(reparsed, server);
        }
    }

    if let Ok(addr) = input.parse::<InvitationAddr>() {
        if plain_host(addr.server()) {
            let reparsed: InvitationAddr = addr.to_url().parse().expect("formatted invitation URL must parse");
            assert_eq!(reparsed, addr);

            let redirected: InvitationAddr =
                addr.to_http_redirection_url().parse().expect("redirection URL must parse");
            assert_eq!(redirected, addr);
        }
    }
});
