//! SigV4 request signing.

use std::fmt::Write as _;

use hmac::{Hmac, Mac};
use sha2::{Digest, Sha256};

use crate::creds::AwsCredentials;

const ALGORITHM: &str = "AWS4-HMAC-SHA256";

/// One signable HTTP request, described independently of the HTTP client.
/// `query` must already be canonical (URL-encoded, sorted); every request we
/// issue carries at most one parameter, which is trivially canonical.
pub struct SignableRequest<'a> {
    pub method: &'a str,
    pub path: &'a str,
    pub query: &'a str,
    pub content_type: &'a str,
    pub body: &'a [u8],
    pub host: &'a str,
}

pub fn hex_sha256(data: &[u8]) -> String {
    to_hex(&Sha256::digest(data))
}

fn to_hex(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len() * 2);
    for byte in bytes {
        let _ = write!(out, "{byte:02x}");
    }
    out
}

fn hmac_step(key: &[u8], message: &[u8]) -> Vec<u8> {
    let mut mac =
        <Hmac<Sha256>>::new_from_slice(key).expect("hmac accepts keys of any length");
    mac.update(message);
    mac.finalize().into_bytes().to_vec()
}

/// Host portion of a URL, tolerating a missing scheme.
pub fn host_of(url: &str) -> &str {
    let without_scheme = url.split_once("://").map_or(url, |(_, rest)| rest);
    without_scheme
        .split(['/', '?'])
        .next()
        .unwrap_or(without_scheme)
}

/// Sign a request for `service` in `region`. Returns the headers to attach:
/// Authorization, x-amz-date, x-amz-content-sha256, and the session token
/// when one is present. The caller still sets Content-Type; Host comes from
/// the URL.
pub fn sign_request(
    request: &SignableRequest<'_>,
    creds: &AwsCredentials,
    region: &str,
    service: &str,
) -> Vec<(String, String)> {
    let now = chrono::Utc::now();
    let amz_date = now.format("%Y%m%dT%H%M%SZ").to_string();
    let day = now.format("%Y%m%d").to_string();
    let payload_hash = hex_sha256(request.body);
    let token = creds.session_token.as_deref();

    // Headers participating in the signature. This fixed list is already
    // lowercase and lexicographically sorted, as the canonical form requires.
    let mut signed: Vec<(&str, &str)> = vec![
        ("content-type", request.content_type),
        ("host", request.host),
        ("x-amz-content-sha256", &payload_hash),
        ("x-amz-date", &amz_date),
    ];
    if let Some(token) = token {
        signed.push(("x-amz-security-token", token));
    }
    let header_list = signed
        .iter()
        .map(|(name, _)| *name)
        .collect::<Vec<_>>()
        .join(";");

    let mut canonical = String::new();
    canonical.push_str(request.method);
    canonical.push('\n');
    canonical.push_str(request.path);
    canonical.push('\n');
    canonical.push_str(request.query);
    canonical.push('\n');
    for (name, value) in &signed {
        let _ = writeln!(canonical, "{name}:{}", value.trim());
    }
    canonical.push('\n');
    canonical.push_str(&header_list);
    canonical.push('\n');
    canonical.push_str(&payload_hash);

    // The signing key folds the scope components through HMAC, seeded with
    // the secret.
    let scope = format!("{day}/{region}/{service}/aws4_request");
    let seed = format!("AWS4{}", creds.secret_access_key).into_bytes();
    let signing_key = [
        day.as_bytes(),
        region.as_bytes(),
        service.as_bytes(),
        b"aws4_request",
    ]
    .into_iter()
    .fold(seed, |key, part| hmac_step(&key, part));

    let string_to_sign = format!(
        "{ALGORITHM}\n{amz_date}\n{scope}\n{}",
        hex_sha256(canonical.as_bytes())
    );
    let signature = to_hex(&hmac_step(&signing_key, string_to_sign.as_bytes()));

    let authorization = format!(
        "{ALGORITHM} Credential={}/{scope},SignedHeaders={header_list},Signature={signature}",
        creds.access_key_id
    );

    let mut headers = vec![
        ("Authorization".to_string(), authorization),
        ("x-amz-content-sha256".to_string(), payload_hash),
        ("x-amz-date".to_string(), amz_date),
    ];
    if let Some(token) = token {
        headers.push(("x-amz-security-token".to_string(), token.to_string()));
    }
    headers
}

#[cfg(test)]
mod tests {
    use super::*;

    fn creds() -> AwsCredentials {
        AwsCredentials {
            access_key_id: "AKIDEXAMPLE".into(),
            secret_access_key: "wJalrXUtnFEMI/K7MDENG+bPxRfiCYEXAMPLEKEY".into(),
            session_token: None,
        }
    }

    fn request<'a>(body: &'a [u8]) -> SignableRequest<'a> {
        SignableRequest {
            method: "POST",
            path: "/",
            query: "",
            content_type: "application/x-www-form-urlencoded; charset=utf-8",
            body,
            host: "ec2.us-east-1.amazonaws.com",
        }
    }

    fn header<'a>(headers: &'a [(String, String)], name: &str) -> Option<&'a str> {
        headers
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }

    #[test]
    fn host_of_strips_scheme_path_and_query() {
        assert_eq!(host_of("https://ec2.us-east-1.amazonaws.com/"), "ec2.us-east-1.amazonaws.com");
        assert_eq!(host_of("http://localhost:9000/foo"), "localhost:9000");
        assert_eq!(host_of("sts.amazonaws.com"), "sts.amazonaws.com");
        assert_eq!(host_of("https://efs.local?FileSystemId=fs-1"), "efs.local");
    }

    #[test]
    fn signed_headers_carry_scope_and_signature() {
        let headers = sign_request(
            &request(b"Action=DescribeVpcs&Version=2016-11-15"),
            &creds(),
            "us-east-1",
            "ec2",
        );
        let auth = header(&headers, "Authorization").unwrap();
        assert!(auth.starts_with("AWS4-HMAC-SHA256 Credential=AKIDEXAMPLE/"));
        assert!(auth.contains("/us-east-1/ec2/aws4_request"));
        assert!(auth.contains("SignedHeaders=content-type;host;x-amz-content-sha256;x-amz-date"));
        assert!(auth.contains("Signature="));
        assert!(header(&headers, "x-amz-date").is_some());
        assert_eq!(
            header(&headers, "x-amz-content-sha256"),
            Some(hex_sha256(b"Action=DescribeVpcs&Version=2016-11-15").as_str())
        );
    }

    #[test]
    fn session_token_joins_the_signed_set() {
        let mut with_token = creds();
        with_token.session_token = Some("token".into());
        let headers = sign_request(&request(b""), &with_token, "us-east-1", "ec2");
        assert_eq!(header(&headers, "x-amz-security-token"), Some("token"));
        assert!(header(&headers, "Authorization")
            .unwrap()
            .contains("x-amz-security-token"));
    }

    #[test]
    fn body_changes_change_the_signature() {
        let a = sign_request(&request(b"Action=A"), &creds(), "us-east-1", "ec2");
        let b = sign_request(&request(b"Action=B"), &creds(), "us-east-1", "ec2");
        assert_ne!(
            header(&a, "Authorization").unwrap(),
            header(&b, "Authorization").unwrap()
        );
    }
}
