// Diffie-Hellman exchange the gate server runs on its init endpoint. Both sides
// end up with the same secret key, which then feeds the signing digest.

use crate::config::HandshakeConfig;
use crate::error::SetupError;
use rand::prelude::*;
use serde::Serialize;

/// Body of the init request, every number as a decimal string.
#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
pub struct HandshakeRequest {
    #[serde(rename = "pKey")]
    pub modulus: String,
    #[serde(rename = "gKey")]
    pub generator: String,
    #[serde(rename = "AKey")]
    pub public_value: String,
}

pub struct KeyExchange {
    modulus: u64,
    generator: u64,
    private_exponent: u64,
}

impl KeyExchange {
    pub fn new(params: &HandshakeConfig) -> Result<Self, SetupError> {
        let mut randomizer = rand_chacha::ChaChaRng::from_entropy();
        KeyExchange::with_rng(params, &mut randomizer)
    }

    pub fn with_rng<R: Rng>(params: &HandshakeConfig, rng: &mut R) -> Result<Self, SetupError> {
        if params.modulus <= 3 || params.generator < 2 || params.generator >= params.modulus {
            return Err(SetupError::Handshake(format!(
                "unusable group parameters p={} g={}",
                params.modulus, params.generator
            )));
        }

        Ok(KeyExchange {
            modulus: params.modulus,
            generator: params.generator,
            private_exponent: rng.gen_range(2..params.modulus - 1),
        })
    }

    pub fn public_value(&self) -> u64 {
        mod_pow(self.generator, self.private_exponent, self.modulus)
    }

    pub fn request(&self) -> HandshakeRequest {
        HandshakeRequest {
            modulus: self.modulus.to_string(),
            generator: self.generator.to_string(),
            public_value: self.public_value().to_string(),
        }
    }

    /// Combines the server's public value with our exponent.
    pub fn shared_secret(&self, server_public: u64) -> Result<u64, SetupError> {
        // 0, 1 and p-1 would pin the secret to a guessable value
        if server_public < 2 || server_public >= self.modulus - 1 {
            return Err(SetupError::Handshake(format!(
                "server public value {} is outside [2, p-1)",
                server_public
            )));
        }
        Ok(mod_pow(server_public, self.private_exponent, self.modulus))
    }
}

pub fn mod_pow(base: u64, exponent: u64, modulus: u64) -> u64 {
    if modulus == 1 {
        return 0;
    }
    let modulus = u128::from(modulus);
    let mut result: u128 = 1;
    let mut base = u128::from(base) % modulus;
    let mut exponent = exponent;

    while exponent > 0 {
        if exponent & 1 == 1 {
            result = result * base % modulus;
        }
        base = base * base % modulus;
        exponent >>= 1;
    }

    // result < modulus, which came from a u64
    result as u64
}

#[cfg(test)]
mod key_exchange_tests {
    use super::*;
    use crate::config::{DEFAULT_GENERATOR, DEFAULT_MODULUS};
    use rand_chacha::ChaChaRng;

    #[test]
    fn mod_pow_small_values() {
        assert_eq!(mod_pow(2, 10, 1000), 24);
        assert_eq!(mod_pow(5, 117, 19), 1);
        assert_eq!(mod_pow(7, 0, 13), 1);
        assert_eq!(mod_pow(7, 3, 1), 0);
    }

    #[test]
    fn mod_pow_matches_reference_values() {
        // Computed independently with arbitrary-precision integers
        assert_eq!(
            mod_pow(DEFAULT_GENERATOR, 123456789, DEFAULT_MODULUS),
            900028755291473330
        );
        assert_eq!(
            mod_pow(1436856447031400654, 123456789, DEFAULT_MODULUS),
            863461581966571672
        );
    }

    #[test]
    fn both_sides_agree() {
        let params = HandshakeConfig::default();
        let mut rng = ChaChaRng::seed_from_u64(7);
        let device = KeyExchange::with_rng(&params, &mut rng).unwrap();
        let server = KeyExchange::with_rng(&params, &mut rng).unwrap();

        assert_eq!(
            device.shared_secret(server.public_value()).unwrap(),
            server.shared_secret(device.public_value()).unwrap()
        );
    }

    #[test]
    fn request_uses_server_field_names() {
        let params = HandshakeConfig {
            modulus: 23,
            generator: 5,
            ..HandshakeConfig::default()
        };
        let exchange = KeyExchange::with_rng(&params, &mut ChaChaRng::seed_from_u64(1)).unwrap();
        let json = serde_json::to_value(exchange.request()).unwrap();

        assert_eq!(json["pKey"], "23");
        assert_eq!(json["gKey"], "5");
        assert_eq!(json["AKey"], exchange.public_value().to_string());
    }

    #[test]
    fn degenerate_server_values_rejected() {
        let params = HandshakeConfig::default();
        let exchange = KeyExchange::with_rng(&params, &mut ChaChaRng::seed_from_u64(3)).unwrap();
        for bad in [0, 1, DEFAULT_MODULUS - 1, DEFAULT_MODULUS, u64::MAX] {
            assert!(exchange.shared_secret(bad).is_err());
        }
    }

    #[test]
    fn bad_group_rejected() {
        let params = HandshakeConfig {
            modulus: 3,
            generator: 2,
            ..HandshakeConfig::default()
        };
        assert!(KeyExchange::with_rng(&params, &mut ChaChaRng::seed_from_u64(0)).is_err());
    }
}
