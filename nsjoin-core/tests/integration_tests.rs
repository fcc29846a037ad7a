use nsjoin_core::env::{DEFAULT_ORDER, EARLY_MARKER, ORDER_SEPARATOR};
use nsjoin_core::*;

#[test]
fn test_default_order_tokens_parse() {
    let tokens: Vec<OrderToken> = DEFAULT_ORDER
        .split(ORDER_SEPARATOR)
        .map(|t| OrderToken::parse(t).unwrap())
        .collect();

    assert_eq!(tokens[0].ns_type, NamespaceType::User);
    assert_eq!(tokens[1].ns_type, NamespaceType::Mnt);
    assert!(tokens[0].resolve_early);
    assert!(tokens[1].resolve_early);

    // Re-encoding yields the same text
    let encoded: Vec<String> = tokens.iter().map(ToString::to_string).collect();
    assert_eq!(encoded.join(","), DEFAULT_ORDER);
}

#[test]
fn test_namespace_type_parse_errors() {
    for bad in ["", "time", "Net", "!net", "net "] {
        let err = bad.parse::<NamespaceType>().unwrap_err();
        assert!(matches!(err, Error::Resolution { .. }), "{bad:?}: {err}");
    }
}

#[test]
fn test_namespace_ref_token_encoding() {
    let refs = [
        NamespaceRef::early(NamespaceType::User, "/proc/1/ns/user"),
        NamespaceRef::new(NamespaceType::Net, "/proc/1/ns/net"),
    ];
    let order: Vec<String> = refs.iter().map(|r| r.token().to_string()).collect();

    assert_eq!(order, vec![format!("{EARLY_MARKER}user"), "net".to_string()]);
}

#[test]
fn test_namespace_ref_json_defaults_to_late() {
    let ns: NamespaceRef =
        serde_json::from_str(r#"{"ns_type":"ipc","path":"/proc/1/ns/ipc"}"#).unwrap();

    assert_eq!(ns.ns_type, NamespaceType::Ipc);
    assert!(!ns.resolve_early);
}

#[test]
fn test_error_display() {
    let err = Error::Resolution {
        message: "duplicate namespace type \"net\"".to_string(),
    };
    assert_eq!(
        err.to_string(),
        "cannot resolve namespaces: duplicate namespace type \"net\""
    );

    let err: Error = std::io::Error::from_raw_os_error(nix::errno::Errno::ENOENT as i32).into();
    assert!(matches!(err, Error::Io(_)));
}
