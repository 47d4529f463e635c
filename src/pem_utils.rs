use crate::error::{Result, StewardError};

/// Convert DER‑encoded data into a PEM‑encoded string with the provided label.
pub fn der_to_pem(der: &[u8], label: &str) -> String {
    let pem = pem::Pem::new(label, der);
    pem::encode_config(
        &pem,
        pem::EncodeConfig::new().set_line_ending(pem::LineEnding::LF),
    )
}

/// Parse a PEM block and return its label together with the DER contents.
pub fn pem_to_labeled_der(pem_str: &str) -> Result<(String, Vec<u8>)> {
    let pem = pem::parse(pem_str)?;
    Ok((pem.tag().to_string(), pem.contents().to_vec()))
}

/// Parse a PEM block that must carry `label`.
pub fn pem_to_der_expecting(pem_str: &str, label: &str) -> Result<Vec<u8>> {
    let (found, der) = pem_to_labeled_der(pem_str)?;
    if found != label {
        return Err(StewardError::DecodingError(format!(
            "expected PEM label {label}, found {found}"
        )));
    }
    Ok(der)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_label_is_checked() {
        let pem = der_to_pem(&[0x30, 0x00], "CERTIFICATE REQUEST");
        assert!(pem.starts_with("-----BEGIN CERTIFICATE REQUEST-----\n"));
        assert!(!pem.contains('\r'));
        assert_eq!(
            pem_to_der_expecting(&pem, "CERTIFICATE REQUEST").unwrap(),
            vec![0x30, 0x00]
        );
        assert!(pem_to_der_expecting(&pem, "CERTIFICATE").is_err());
    }
}
