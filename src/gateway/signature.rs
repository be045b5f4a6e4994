use sha2::{Digest, Sha512};

/// `hex(sha512(order_id + status_code + gross_amount + server_key))`
pub fn compute_signature(
    order_id: &str,
    status_code: &str,
    gross_amount: &str,
    server_key: &str,
) -> String {
    let mut hasher = Sha512::new();
    hasher.update(order_id.as_bytes());
    hasher.update(status_code.as_bytes());
    hasher.update(gross_amount.as_bytes());
    hasher.update(server_key.as_bytes());
    hex::encode(hasher.finalize())
}

pub fn verify_signature(
    order_id: &str,
    status_code: &str,
    gross_amount: &str,
    server_key: &str,
    signature_key: &str,
) -> bool {
    let expected = compute_signature(order_id, status_code, gross_amount, server_key);
    constant_time_eq(&expected, &signature_key.to_ascii_lowercase())
}

fn constant_time_eq(a: &str, b: &str) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut res = 0u8;
    for (x, y) in a.as_bytes().iter().zip(b.as_bytes()) {
        res |= x ^ y;
    }
    res == 0
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn known_vector() {
        // sha512("PAY-1" "200" "10000.00" "key")
        let sig = compute_signature("PAY-1", "200", "10000.00", "key");
        assert_eq!(sig.len(), 128);
        assert!(verify_signature("PAY-1", "200", "10000.00", "key", &sig));
        assert!(verify_signature(
            "PAY-1",
            "200",
            "10000.00",
            "key",
            &sig.to_ascii_uppercase()
        ));
    }

    #[test]
    fn any_field_change_breaks_signature() {
        let sig = compute_signature("PAY-1", "200", "10000.00", "key");
        assert!(!verify_signature("PAY-2", "200", "10000.00", "key", &sig));
        assert!(!verify_signature("PAY-1", "201", "10000.00", "key", &sig));
        assert!(!verify_signature("PAY-1", "200", "10000.01", "key", &sig));
        assert!(!verify_signature("PAY-1", "200", "10000.00", "other", &sig));
        assert!(!verify_signature("PAY-1", "200", "10000.00", "key", ""));
    }

    proptest! {
        #[test]
        fn computed_signature_always_verifies(
            order_id in "[A-Z0-9-]{1,50}",
            status in "[0-9]{3}",
            amount in "[0-9]{1,9}\\.[0-9]{2}",
            key in "[A-Za-z0-9-]{8,40}",
        ) {
            let sig = compute_signature(&order_id, &status, &amount, &key);
            prop_assert!(verify_signature(&order_id, &status, &amount, &key, &sig));
        }

        #[test]
        fn wrong_key_never_verifies(
            order_id in "[A-Z0-9-]{1,50}",
            key in "[a-z]{8,20}",
            other in "[A-Z]{8,20}",
        ) {
            let sig = compute_signature(&order_id, "200", "1.00", &key);
            prop_assert!(!verify_signature(&order_id, "200", "1.00", &other, &sig));
        }
    }
}
