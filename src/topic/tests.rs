use super::*;

#[test]
fn test_valid_filters() {
    for filter in ["a", "a/b", "a/+", "+", "#", "a/#", "+/+", "/", "a//b", "/+/#", "$SYS/#"] {
        assert!(is_valid_filter(filter.as_bytes()), "{filter} should be valid");
    }
}

#[test]
fn test_invalid_filters() {
    for filter in ["", "a/#/b", "#/a", "a#", "a/b#", "a+", "a/+b", "++", "##", "a/\0"] {
        assert!(!is_valid_filter(filter.as_bytes()), "{filter:?} should be invalid");
    }
}

#[test]
fn test_topic_names() {
    assert!(is_valid_topic_name(b"a/b"));
    assert!(is_valid_topic_name(b"/"));
    assert!(!is_valid_topic_name(b""));
    assert!(!is_valid_topic_name(b"a/+"));
    assert!(!is_valid_topic_name(b"a/#"));
}

#[test]
fn test_multi_level_wildcard() {
    assert!(topic_matches(b"a/b/c", b"a/b/#"));
    assert!(topic_matches(b"a/b", b"a/b/#"));
    assert!(topic_matches(b"a/b/", b"a/b/#"));
    assert!(topic_matches(b"/", b"#"));
    assert!(topic_matches(b"anything/at/all", b"#"));
    assert!(!topic_matches(b"a/c", b"a/b/#"));
}

#[test]
fn test_single_level_wildcard() {
    assert!(topic_matches(b"sensors/room1/temp", b"sensors/+/temp"));
    assert!(topic_matches(b"/", b"+/+"));
    assert!(topic_matches(b"a/", b"a/+"));
    assert!(topic_matches(b"/finance", b"+/+"));
    assert!(topic_matches(b"/finance", b"/+"));
    assert!(!topic_matches(b"/", b"+"));
    assert!(!topic_matches(b"/finance", b"+"));
    assert!(!topic_matches(b"a", b"a/+"));
    assert!(!topic_matches(b"sensors/room1/humidity", b"sensors/+/temp"));
    assert!(!topic_matches(b"sensors/room1/sub/temp", b"sensors/+/temp"));
}

#[test]
fn test_literal_filters_need_equality() {
    assert!(topic_matches(b"a/b/c", b"a/b/c"));
    assert!(!topic_matches(b"a/b/c", b"a/b/c/d"));
    assert!(!topic_matches(b"a/b/c/d", b"a/b/c"));
    assert!(!topic_matches(b"a/b", b"a/bc"));
    assert!(!topic_matches(b"A/b", b"a/b"));
}

#[test]
fn test_dollar_topics_skip_leading_wildcards() {
    assert!(!topic_matches(b"$SYS/uptime", b"#"));
    assert!(!topic_matches(b"$SYS/uptime", b"+/uptime"));
    assert!(topic_matches(b"$SYS/uptime", b"$SYS/#"));
    assert!(topic_matches(b"$SYS/uptime", b"$SYS/+"));
}
