/// Marker the server must echo within the reply window for the upgrade to
/// count as accepted.
pub const SWITCHING_PROTOCOLS: &str = "101 Switching Protocols";

/// Key sent on every handshake.
///
/// TODO: generate a fresh key per connection and verify the
/// Sec-WebSocket-Accept echo. The deployed bridge accepts the reused
/// sample nonce, but a stricter server may reject it.
pub const STATIC_KEY: &str = "dGhlIHNhbXBsZSBub25jZQ==";

/// Build the HTTP/1.1 Upgrade request for the given endpoint.
pub fn upgrade_request(host: &str, port: u16, key: &str) -> String {
    format!(
        "GET / HTTP/1.1\r\n\
         Host: {host}:{port}\r\n\
         Upgrade: websocket\r\n\
         Connection: Upgrade\r\n\
         Sec-WebSocket-Key: {key}\r\n\
         Sec-WebSocket-Version: 13\r\n\
         \r\n"
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn it_builds_the_upgrade_request() {
        let request = upgrade_request("203.0.113.7", 8765, STATIC_KEY);
        assert!(request.starts_with("GET / HTTP/1.1\r\n"));
        assert!(request.contains("Host: 203.0.113.7:8765\r\n"));
        assert!(request.contains("Upgrade: websocket\r\n"));
        assert!(request.contains("Connection: Upgrade\r\n"));
        assert!(request.contains(&format!("Sec-WebSocket-Key: {STATIC_KEY}\r\n")));
        assert!(request.contains("Sec-WebSocket-Version: 13\r\n"));
        assert!(request.ends_with("\r\n\r\n"));
    }

    #[test]
    fn it_is_a_bare_header_block() {
        let request = upgrade_request("example.net", 80, "abc");
        // Exactly one blank line, at the end.
        assert_eq!(request.matches("\r\n\r\n").count(), 1);
    }
}
