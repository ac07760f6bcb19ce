//! URL utility functions

use crate::error::{Error, Result};
use crate::models::ParsedProxyEndpoint;
use percent_encoding::percent_decode_str;
use url::Url;

/// Parse a proxy URL of the form `[scheme://][user[:password]@]host[:port]`.
///
/// A missing scheme is left empty rather than defaulted. Credentials are
/// percent-decoded. Anything after the authority (a trailing `/` or path) is
/// dropped from `hostport`.
pub fn parse_proxy_url(proxy: &str) -> Result<ParsedProxyEndpoint> {
    // Without a usable scheme the whole input is checked for a `//` authority
    let (scheme, rest) = match split_scheme(proxy) {
        Some((scheme, rest)) if rest.starts_with('/') => (scheme.to_ascii_lowercase(), rest),
        _ => (String::new(), proxy),
    };

    let authority = if rest.starts_with('/') {
        let rest = rest
            .strip_prefix("//")
            .ok_or_else(|| Error::Config(format!("proxy URL with no authority: {}", proxy)))?;
        // The path starts at the first '/' after the userinfo separator
        let search_from = rest.find('@').unwrap_or(0);
        let end = rest[search_from..]
            .find('/')
            .map(|i| search_from + i)
            .unwrap_or(rest.len());
        &rest[..end]
    } else {
        rest
    };

    let (userinfo, hostport) = match authority.rsplit_once('@') {
        Some((userinfo, hostport)) => (Some(userinfo), hostport),
        None => (None, authority),
    };

    if hostport.is_empty() {
        return Err(Error::Config(format!("proxy URL with no host: {}", proxy)));
    }

    let (username, password) = match userinfo {
        Some(userinfo) => match userinfo.split_once(':') {
            Some((user, password)) => (Some(decode(user, proxy)?), Some(decode(password, proxy)?)),
            None => (Some(decode(userinfo, proxy)?), None),
        },
        None => (None, None),
    };

    Ok(ParsedProxyEndpoint {
        scheme,
        username,
        password,
        hostport: hostport.to_string(),
    })
}

/// Split `scheme:rest` where the scheme is non-empty and holds no `/`.
fn split_scheme(url: &str) -> Option<(&str, &str)> {
    let (scheme, rest) = url.split_once(':')?;
    if scheme.is_empty() || scheme.contains('/') {
        return None;
    }
    Some((scheme, rest))
}

fn decode(component: &str, proxy: &str) -> Result<String> {
    percent_decode_str(component)
        .decode_utf8()
        .map(|decoded| decoded.into_owned())
        .map_err(|_| Error::Config(format!("proxy URL credentials are not valid UTF-8: {}", proxy)))
}

/// Check a host against a comma-separated `no_proxy` list.
///
/// `*` matches every host. Entries are trimmed, a leading `.` is ignored and
/// a domain entry matches itself and all of its subdomains. Ports on either
/// side are ignored.
pub fn no_proxy_matches(no_proxy: &str, host: &str) -> bool {
    let host = strip_port(host).trim_end_matches('.').to_ascii_lowercase();
    if host.is_empty() {
        return false;
    }

    no_proxy
        .split(',')
        .map(str::trim)
        .filter(|entry| !entry.is_empty())
        .any(|entry| {
            if entry == "*" {
                return true;
            }
            let entry = strip_port(entry.trim_start_matches('.')).to_ascii_lowercase();
            !entry.is_empty() && (host == entry || host.ends_with(&format!(".{}", entry)))
        })
}

fn strip_port(host: &str) -> &str {
    if let Some(rest) = host.strip_prefix('[') {
        return rest.split_once(']').map(|(addr, _)| addr).unwrap_or(rest);
    }
    match host.rsplit_once(':') {
        // A second ':' means a bare IPv6 address, which has no port
        Some((name, port)) if !name.contains(':') && port.chars().all(|c| c.is_ascii_digit()) => name,
        _ => host,
    }
}

/// Extract the host of an absolute URL, if it has one
pub fn target_host(url: &str) -> Result<String> {
    let parsed = Url::parse(url)?;
    parsed
        .host_str()
        .map(str::to_string)
        .ok_or_else(|| Error::Config(format!("URL has no host: {}", url)))
}

/// Check if URL is HTTPS
pub fn is_https(url: &Url) -> bool {
    url.scheme() == "https"
}
