//! Packing of `(client id, request id)` pairs into a single upstream id.
//!
//! The browser accepts one inspector socket per page, so every attached client
//! shares that socket and request ids from different clients would collide.
//! The codec partitions a 31-bit integer space into a high client-id field and
//! a low request-id field; replies coming back from the browser decode to
//! exactly the client that issued the request. 31 bits (not 32) keeps every
//! encoded id a safe non-negative integer under any JSON number
//! representation.

/// Width of the shared id space in bits.
const BITS: u32 = 31;

/// A client-chosen request id does not fit into the request-id field.
///
/// Only a misbehaving client produces this; the affected frame is dropped and
/// the client disconnected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("request id {request_id} does not fit into {width} bits")]
pub struct IdOverflow {
    /// The offending request id.
    pub request_id: u64,
    /// Width of the request-id field.
    pub width: u32,
}

/// Packs `(client_id, request_id)` into a fixed-width upstream id and unpacks
/// it back.
///
/// Pure and `Copy`; the parameters are fixed at startup and one instance is
/// shared by all page brokers.
#[derive(Debug, Clone, Copy)]
pub struct IdCodec {
    client_bits: u32,
    max_request_id: u32,
}

impl IdCodec {
    /// Derives the field split for the given client capacity.
    ///
    /// The client field is `ceil(log2(max_clients))` bits wide, so the
    /// effective capacity may round up to the next power of two; see
    /// [`IdCodec::max_clients`].
    pub fn new(max_clients: usize) -> Self {
        let client_bits = max_clients.max(1).next_power_of_two().trailing_zeros();
        Self {
            client_bits,
            max_request_id: ((1u64 << (BITS - client_bits)) - 1) as u32,
        }
    }

    /// Effective client capacity: `2^B`, possibly above the configured value.
    pub fn max_clients(&self) -> usize {
        1 << self.client_bits
    }

    /// Largest request id a client may use.
    pub fn max_request_id(&self) -> u32 {
        self.max_request_id
    }

    /// Packs a client id and a client-chosen request id into an upstream id.
    ///
    /// `client_id` is in range by construction (the broker never allocates
    /// beyond the capacity); `request_id` is whatever the client sent and is
    /// checked against the field width.
    pub fn encode(&self, client_id: u32, request_id: u64) -> Result<u32, IdOverflow> {
        if request_id > u64::from(self.max_request_id) {
            return Err(IdOverflow {
                request_id,
                width: BITS - self.client_bits,
            });
        }
        Ok((client_id << (BITS - self.client_bits)) | request_id as u32)
    }

    /// Unpacks an upstream id; exact inverse of [`IdCodec::encode`].
    pub fn decode(&self, encoded: u32) -> (u32, u32) {
        (
            encoded >> (BITS - self.client_bits),
            encoded & self.max_request_id,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip_boundaries() {
        // max_clients = 4 gives two client bits and 29-bit request ids
        let codec = IdCodec::new(4);
        assert_eq!(codec.encode(3, 0).unwrap(), 0x6000_0000);
        assert_eq!(codec.decode(0x6000_0000), (3, 0));
        assert_eq!(codec.encode(0, (1 << 29) - 1).unwrap(), 0x1FFF_FFFF);
        assert_eq!(codec.decode(0x1FFF_FFFF), (0, (1 << 29) - 1));
        assert!(codec.encode(0, 1 << 29).is_err());
    }

    #[test]
    fn decode_inverts_encode() {
        let codec = IdCodec::new(4);
        for client_id in 0..4 {
            for request_id in [0u64, 1, 7, 0x1234_5678, (1 << 29) - 1] {
                let encoded = codec.encode(client_id, request_id).unwrap();
                assert_eq!(codec.decode(encoded), (client_id, request_id as u32));
            }
        }
    }

    #[test]
    fn overflow_exactly_when_the_field_is_exceeded() {
        let codec = IdCodec::new(2);
        assert_eq!(codec.max_request_id(), (1 << 30) - 1);
        assert!(codec.encode(1, (1 << 30) - 1).is_ok());
        assert_eq!(
            codec.encode(1, 1 << 30),
            Err(IdOverflow {
                request_id: 1 << 30,
                width: 30,
            })
        );
    }

    #[test]
    fn capacity_rounds_up_to_a_power_of_two() {
        assert_eq!(IdCodec::new(1).max_clients(), 1);
        assert_eq!(IdCodec::new(2).max_clients(), 2);
        assert_eq!(IdCodec::new(3).max_clients(), 4);
        assert_eq!(IdCodec::new(5).max_clients(), 8);
    }

    #[test]
    fn a_single_client_gets_the_whole_space() {
        let codec = IdCodec::new(1);
        assert_eq!(codec.max_request_id(), 0x7FFF_FFFF);
        assert_eq!(codec.encode(0, 0x7FFF_FFFF).unwrap(), 0x7FFF_FFFF);
        assert_eq!(codec.decode(0x7FFF_FFFF), (0, 0x7FFF_FFFF));
    }

    #[test]
    fn clients_with_equal_request_ids_stay_apart() {
        let codec = IdCodec::new(2);
        let first = codec.encode(0, 7).unwrap();
        let second = codec.encode(1, 7).unwrap();
        assert_eq!(first, 7);
        assert_eq!(second, (1 << 30) | 7);
        assert_eq!(codec.decode(first), (0, 7));
        assert_eq!(codec.decode(second), (1, 7));
    }
}
