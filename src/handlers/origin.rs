use std::net::{IpAddr, SocketAddr};

use http::HeaderMap;

const X_FORWARDED_FOR: &str = "x-forwarded-for";

/// レート制限・監査に使う送信元IP
///
/// `trust_forwarded_for` が true の場合のみ X-Forwarded-For の先頭を採用する。
/// ヘッダーが不正な場合は接続元アドレスにフォールバック
pub fn client_origin(headers: &HeaderMap, peer: SocketAddr, trust_forwarded_for: bool) -> String {
    if trust_forwarded_for
        && let Some(ip) = headers
            .get(X_FORWARDED_FOR)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.split(',').next())
            .and_then(|first| first.trim().parse::<IpAddr>().ok())
    {
        return ip.to_string();
    }

    peer.ip().to_string()
}
