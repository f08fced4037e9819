/// Zero-pad a segment sequence number to the 16 digits used in file names.
pub(crate) fn format_pad16_u64(n: u64) -> String {
    format!("{:016}", n)
}

/// Zero-pad a log index to the 20 digits used in file names, enough to hold
/// any `u64`.
pub(crate) fn format_pad20_u64(n: u64) -> String {
    format!("{:020}", n)
}
