use crate::hw::Capability;

/// Formats bytes as uppercase hexadecimal pairs separated by spaces.
pub(crate) fn format_hex(bytes: &[u8]) -> String {
    if bytes.is_empty() {
        return "<empty>".to_string();
    }

    hex::encode_upper(bytes)
        .as_bytes()
        .chunks(2)
        .map(|pair| String::from_utf8_lossy(pair).into_owned())
        .collect::<Vec<_>>()
        .join(" ")
}

pub(crate) fn format_rssi(rssi: i16) -> String {
    format!("{rssi} dBm")
}

/// Joins capability labels, e.g. `read,notify`.
pub(crate) fn format_capabilities<'a>(
    capabilities: impl IntoIterator<Item = &'a Capability>,
) -> String {
    let labels: Vec<String> = capabilities
        .into_iter()
        .map(ToString::to_string)
        .collect();
    if labels.is_empty() {
        "none".to_string()
    } else {
        labels.join(",")
    }
}
