//! Browser-shaped `User-Agent` synthesis.
//!
//! The knock request must blend into ordinary web traffic, so its
//! `User-Agent` header mimics a desktop Chrome build parameterised by the
//! host platform. The exact string is cosmetic; it only has to be
//! well-formed and carry no trace of this library.

const USER_AGENT_TEMPLATE: &str =
    "Mozilla/5.0 ({}; {}) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/125.0.0.0 Safari/537.3";

/// Build the `User-Agent` string for the current host OS and architecture.
pub fn device_user_agent() -> String {
    user_agent_for(std::env::consts::OS, std::env::consts::ARCH)
}

/// Build a `User-Agent` string for the given OS/arch pair.
pub fn user_agent_for(os: &str, arch: &str) -> String {
    USER_AGENT_TEMPLATE
        .replacen("{}", &os.to_uppercase(), 1)
        .replacen("{}", &arch.to_uppercase(), 1)
}
