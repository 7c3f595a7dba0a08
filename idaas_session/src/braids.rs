use aliri_braid::braid;
use std::fmt;

macro_rules! limited_reveal {
    ($ty:ty: $hidden:literal, $default:literal) => {
        impl fmt::Debug for $ty {
            fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
                if f.alternate() {
                    f.write_str("\"")?;
                    limited_reveal(&self.0, &mut *f, $default)?;
                    f.write_str("\"")
                } else {
                    f.write_str(concat!("***", $hidden, "***"))
                }
            }
        }

        impl fmt::Display for $ty {
            fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
                if f.alternate() {
                    limited_reveal(&self.0, &mut *f, usize::MAX)
                } else {
                    f.write_str(concat!("***", $hidden, "***"))
                }
            }
        }
    };
}

fn limited_reveal(unprotected: &str, f: &mut fmt::Formatter, default_len: usize) -> fmt::Result {
    let max_len = f.width().unwrap_or(default_len);
    if max_len <= 1 {
        f.write_str("…")
    } else if max_len > unprotected.len() {
        f.write_str(unprotected)
    } else {
        match unprotected.char_indices().nth(max_len - 2) {
            Some((idx, c)) if idx + c.len_utf8() < unprotected.len() => {
                f.write_str(&unprotected[0..idx + c.len_utf8()])?;
                f.write_str("…")
            }
            _ => f.write_str(unprotected),
        }
    }
}

/// A short-lived token authorizing individual API calls
#[braid(serde, debug = "owned", display = "owned")]
pub struct AccessToken;

limited_reveal!(AccessTokenRef: "ACCESS TOKEN", 15);

/// A long-lived token authorizing the issuance of access tokens
#[braid(serde, debug = "owned", display = "owned")]
pub struct RefreshToken;

limited_reveal!(RefreshTokenRef: "REFRESH TOKEN", 5);

/// A user's password
#[braid(serde, debug = "owned", display = "owned")]
pub struct Password;

limited_reveal!(PasswordRef: "PASSWORD", 0);

/// A token identifying an issued captcha challenge
#[braid(serde)]
pub struct CaptchaToken;

/// Drops tokens the backend sent back as empty strings
pub(crate) fn present<T: AsRef<str>>(token: Option<T>) -> Option<T> {
    token.filter(|t| !t.as_ref().is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn secrets_are_hidden_by_default() {
        let token = RefreshToken::from_static("r1-super-secret");
        assert_eq!(format!("{}", token), "***REFRESH TOKEN***");
        assert_eq!(format!("{:?}", token), "***REFRESH TOKEN***");
    }

    #[test]
    fn alternate_debug_reveals_a_bounded_prefix() {
        let token = RefreshToken::from_static("r1-super-secret");
        assert_eq!(format!("{:#?}", token), "\"r1-s…\"");
        assert_eq!(format!("{:#}", token), "r1-super-secret");
    }

    #[test]
    fn passwords_never_reveal_a_prefix_in_debug() {
        let password = Password::from_static("hunter2");
        assert_eq!(format!("{:?}", password), "***PASSWORD***");
        assert_eq!(format!("{:#?}", password), "\"…\"");
    }

    #[test]
    fn empty_tokens_are_not_present() {
        assert_eq!(present(Some(AccessToken::from_static(""))), None);
        assert_eq!(
            present(Some(AccessToken::from_static("a1"))),
            Some(AccessToken::from_static("a1"))
        );
    }
}
