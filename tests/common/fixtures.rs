//! Page bodies and record lines as the remote services and clients produce them

/// Login page for a confirmed session
pub const LOGIN_OK: &str = "<html><body>Welcome back, alice<br>logged in</body></html>";

/// Manual result page after an accepted submission
pub const SUBMIT_OK: &str = "<html><body><pre>processing: 1 result(s)</pre></body></html>";

/// Manual assignment page holding `records`, one per line inside a textarea
pub fn assignment_page(records: &[String]) -> String {
    format!(
        "<html><body><p>Assignments:</p><pre>{}</pre><p>Good luck!</p></body></html>",
        records.join("\n")
    )
}

/// `count` distinct trial factoring assignments starting at `first_exponent`
pub fn tf_assignments(first_exponent: u32, count: usize) -> Vec<String> {
    (0..count)
        .map(|i| format!("Factor=N/A,{},72,73", first_exponent + 2 * i as u32))
        .collect()
}

/// An mfakto "no factor" result line for `exponent`
pub fn tf_result(exponent: u32, from: u32) -> String {
    format!(
        "no factor for M{exponent} from 2^{from} to 2^{} {}",
        from + 1,
        "[mfakto 0.15pre6-Win cl_barrett15_73_gs_2]"
    )
}

/// A clLucas result line for `exponent`
pub fn ll_result(exponent: u32) -> String {
    format!("M( {exponent} )C, 0x3f2a1b0c9d8e7f60, n = 2097152, clLucas v1.04")
}
