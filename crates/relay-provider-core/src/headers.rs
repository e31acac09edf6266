pub type Headers = Vec<(String, String)>;

pub fn header_set(headers: &mut Headers, name: impl Into<String>, value: impl Into<String>) {
    let name = name.into();
    let value = value.into();
    if let Some((_, v)) = headers
        .iter_mut()
        .find(|(k, _)| k.eq_ignore_ascii_case(&name))
    {
        *v = value;
        return;
    }
    headers.push((name, value));
}

pub fn header_get<'a>(headers: &'a Headers, name: &str) -> Option<&'a str> {
    headers
        .iter()
        .find(|(k, _)| k.eq_ignore_ascii_case(name))
        .map(|(_, v)| v.as_str())
}

pub fn header_remove(headers: &mut Headers, name: &str) -> Option<String> {
    let idx = headers
        .iter()
        .position(|(k, _)| k.eq_ignore_ascii_case(name))?;
    Some(headers.remove(idx).1)
}

/// Overlay `top` onto `base`; names are compared case-insensitively and `top` wins.
pub fn header_merge(base: &Headers, top: &Headers) -> Headers {
    let mut merged = base.clone();
    for (name, value) in top {
        header_set(&mut merged, name.clone(), value.clone());
    }
    merged
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn merge_overrides_case_insensitively() {
        let base = vec![
            ("Content-Type".to_string(), "application/json".to_string()),
            ("User-Agent".to_string(), "null".to_string()),
        ];
        let top = vec![
            ("user-agent".to_string(), "relay".to_string()),
            ("Authorization".to_string(), "Bearer k".to_string()),
        ];
        let merged = header_merge(&base, &top);
        assert_eq!(merged.len(), 3);
        assert_eq!(header_get(&merged, "USER-AGENT"), Some("relay"));
        assert_eq!(header_get(&merged, "authorization"), Some("Bearer k"));
    }

    #[test]
    fn remove_returns_value() {
        let mut headers = vec![("X-A".to_string(), "1".to_string())];
        assert_eq!(header_remove(&mut headers, "x-a").as_deref(), Some("1"));
        assert!(headers.is_empty());
    }
}
