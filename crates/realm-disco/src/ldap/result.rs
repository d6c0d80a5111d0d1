// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! LDAP result codes (RFC 4511 §4.1.9).

pub const SUCCESS: u32 = 0;
pub const OPERATIONS_ERROR: u32 = 1;
pub const PROTOCOL_ERROR: u32 = 2;
pub const TIME_LIMIT_EXCEEDED: u32 = 3;
pub const SIZE_LIMIT_EXCEEDED: u32 = 4;
pub const AUTH_METHOD_NOT_SUPPORTED: u32 = 7;
pub const STRONGER_AUTH_REQUIRED: u32 = 8;
pub const REFERRAL: u32 = 10;
pub const ADMIN_LIMIT_EXCEEDED: u32 = 11;
pub const UNAVAILABLE_CRITICAL_EXTENSION: u32 = 12;
pub const CONFIDENTIALITY_REQUIRED: u32 = 13;
pub const NO_SUCH_ATTRIBUTE: u32 = 16;
pub const UNDEFINED_ATTRIBUTE_TYPE: u32 = 17;
pub const INAPPROPRIATE_MATCHING: u32 = 18;
pub const NO_SUCH_OBJECT: u32 = 32;
pub const INVALID_DN_SYNTAX: u32 = 34;
pub const INAPPROPRIATE_AUTHENTICATION: u32 = 48;
pub const INVALID_CREDENTIALS: u32 = 49;
pub const INSUFFICIENT_ACCESS_RIGHTS: u32 = 50;
pub const BUSY: u32 = 51;
pub const UNAVAILABLE: u32 = 52;
pub const UNWILLING_TO_PERFORM: u32 = 53;
pub const OTHER: u32 = 80;

/// Human readable description of a result code.
pub fn describe(code: u32) -> &'static str {
    match code {
        SUCCESS => "Success",
        OPERATIONS_ERROR => "Operations error",
        PROTOCOL_ERROR => "Protocol error",
        TIME_LIMIT_EXCEEDED => "Time limit exceeded",
        SIZE_LIMIT_EXCEEDED => "Size limit exceeded",
        AUTH_METHOD_NOT_SUPPORTED => "Authentication method not supported",
        STRONGER_AUTH_REQUIRED => "Strong(er) authentication required",
        REFERRAL => "Referral",
        ADMIN_LIMIT_EXCEEDED => "Administrative limit exceeded",
        UNAVAILABLE_CRITICAL_EXTENSION => "Critical extension is unavailable",
        CONFIDENTIALITY_REQUIRED => "Confidentiality required",
        NO_SUCH_ATTRIBUTE => "No such attribute",
        UNDEFINED_ATTRIBUTE_TYPE => "Undefined attribute type",
        INAPPROPRIATE_MATCHING => "Inappropriate matching",
        NO_SUCH_OBJECT => "No such object",
        INVALID_DN_SYNTAX => "Invalid DN syntax",
        INAPPROPRIATE_AUTHENTICATION => "Inappropriate authentication",
        INVALID_CREDENTIALS => "Invalid credentials",
        INSUFFICIENT_ACCESS_RIGHTS => "Insufficient access",
        BUSY => "Server is busy",
        UNAVAILABLE => "Server is unavailable",
        UNWILLING_TO_PERFORM => "Server is unwilling to perform",
        OTHER => "Internal (implementation specific) error",
        _ => "Unknown error",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_describe() {
        assert_eq!(describe(NO_SUCH_OBJECT), "No such object");
        assert_eq!(describe(UNWILLING_TO_PERFORM), "Server is unwilling to perform");
        assert_eq!(describe(4242), "Unknown error");
    }
}
