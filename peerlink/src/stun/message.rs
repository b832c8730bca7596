//! Binding request and response codecs.

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};

use rand::RngCore;

use super::{StunError, MAGIC_COOKIE, STUN_HEADER_SIZE};

const BINDING_REQUEST: u16 = 0x0001;
const BINDING_SUCCESS: u16 = 0x0101;

const ATTR_MAPPED_ADDRESS: u16 = 0x0001;
const ATTR_XOR_MAPPED_ADDRESS: u16 = 0x0020;

const FAMILY_IPV4: u8 = 0x01;
const FAMILY_IPV6: u8 = 0x02;

/// A Binding Request without attributes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BindingRequest {
    pub transaction_id: [u8; 12],
}

impl BindingRequest {
    pub fn new() -> Self {
        let mut transaction_id = [0u8; 12];
        rand::thread_rng().fill_bytes(&mut transaction_id);
        Self { transaction_id }
    }

    pub fn encode(&self) -> [u8; STUN_HEADER_SIZE] {
        let mut msg = [0u8; STUN_HEADER_SIZE];
        msg[0..2].copy_from_slice(&BINDING_REQUEST.to_be_bytes());
        // Length stays 0.
        msg[4..8].copy_from_slice(&MAGIC_COOKIE.to_be_bytes());
        msg[8..20].copy_from_slice(&self.transaction_id);
        msg
    }
}

impl Default for BindingRequest {
    fn default() -> Self {
        Self::new()
    }
}

/// A Binding Success Response, reduced to the address it reports.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BindingResponse {
    pub transaction_id: [u8; 12],
    pub mapped_address: SocketAddr,
}

impl BindingResponse {
    /// Parses a success response; `XOR-MAPPED-ADDRESS` wins over `MAPPED-ADDRESS`.
    pub fn decode(data: &[u8]) -> Result<Self, StunError> {
        if data.len() < STUN_HEADER_SIZE {
            return Err(StunError::TooShort(data.len()));
        }
        let message_type = u16::from_be_bytes([data[0], data[1]]);
        let length = u16::from_be_bytes([data[2], data[3]]) as usize;
        if u32::from_be_bytes([data[4], data[5], data[6], data[7]]) != MAGIC_COOKIE {
            return Err(StunError::BadCookie);
        }
        if message_type != BINDING_SUCCESS {
            return Err(StunError::UnexpectedType(message_type));
        }

        let mut transaction_id = [0u8; 12];
        transaction_id.copy_from_slice(&data[8..20]);

        let end = (STUN_HEADER_SIZE + length).min(data.len());
        let mut attributes = &data[STUN_HEADER_SIZE..end];
        let mut plain = None;
        let mut xored = None;

        while attributes.len() >= 4 {
            let kind = u16::from_be_bytes([attributes[0], attributes[1]]);
            let len = u16::from_be_bytes([attributes[2], attributes[3]]) as usize;
            let Some(value) = attributes.get(4..4 + len) else {
                break;
            };
            match kind {
                ATTR_XOR_MAPPED_ADDRESS => xored = decode_address(value, Some(&transaction_id)),
                ATTR_MAPPED_ADDRESS => plain = decode_address(value, None),
                _ => {}
            }
            // Values are padded to 4 bytes.
            let padded = 4 + len.div_ceil(4) * 4;
            attributes = attributes.get(padded..).unwrap_or_default();
        }

        let mapped_address = xored.or(plain).ok_or(StunError::NoMappedAddress)?;
        Ok(Self {
            transaction_id,
            mapped_address,
        })
    }
}

/// Decodes an address attribute value, undoing the XOR when `transaction_id` is set.
fn decode_address(value: &[u8], transaction_id: Option<&[u8; 12]>) -> Option<SocketAddr> {
    if value.len() < 4 {
        return None;
    }
    let cookie = MAGIC_COOKIE.to_be_bytes();
    let mut port = u16::from_be_bytes([value[2], value[3]]);
    if transaction_id.is_some() {
        port ^= (MAGIC_COOKIE >> 16) as u16;
    }

    let ip = match value[1] {
        FAMILY_IPV4 => {
            let mut octets: [u8; 4] = value.get(4..8)?.try_into().ok()?;
            if transaction_id.is_some() {
                for (octet, mask) in octets.iter_mut().zip(cookie) {
                    *octet ^= mask;
                }
            }
            IpAddr::V4(Ipv4Addr::from(octets))
        }
        FAMILY_IPV6 => {
            let mut octets: [u8; 16] = value.get(4..20)?.try_into().ok()?;
            if let Some(id) = transaction_id {
                let mask = cookie.iter().chain(id.iter());
                for (octet, mask) in octets.iter_mut().zip(mask) {
                    *octet ^= mask;
                }
            }
            IpAddr::V6(Ipv6Addr::from(octets))
        }
        _ => return None,
    };
    Some(SocketAddr::new(ip, port))
}

/// Encodes a success response carrying `XOR-MAPPED-ADDRESS` for an IPv4 `addr`.
#[cfg(test)]
pub(crate) fn encode_success(transaction_id: [u8; 12], addr: std::net::SocketAddrV4) -> Vec<u8> {
    let mut msg = Vec::with_capacity(STUN_HEADER_SIZE + 12);
    msg.extend_from_slice(&BINDING_SUCCESS.to_be_bytes());
    msg.extend_from_slice(&12u16.to_be_bytes());
    msg.extend_from_slice(&MAGIC_COOKIE.to_be_bytes());
    msg.extend_from_slice(&transaction_id);

    msg.extend_from_slice(&ATTR_XOR_MAPPED_ADDRESS.to_be_bytes());
    msg.extend_from_slice(&8u16.to_be_bytes());
    msg.extend_from_slice(&[0x00, FAMILY_IPV4]);
    msg.extend_from_slice(&(addr.port() ^ (MAGIC_COOKIE >> 16) as u16).to_be_bytes());
    msg.extend_from_slice(&(u32::from(*addr.ip()) ^ MAGIC_COOKIE).to_be_bytes());
    msg
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::SocketAddrV4;

    #[test]
    fn test_binding_request_layout() {
        let request = BindingRequest::new();
        let bytes = request.encode();

        assert_eq!(&bytes[0..2], &[0x00, 0x01]);
        assert_eq!(&bytes[2..4], &[0x00, 0x00]);
        assert_eq!(&bytes[4..8], &MAGIC_COOKIE.to_be_bytes());
        assert_eq!(&bytes[8..], &request.transaction_id);
        assert_ne!(request.transaction_id, BindingRequest::new().transaction_id);
    }

    #[test]
    fn test_decode_xor_mapped_ipv4() {
        let id = [7u8; 12];
        let addr = SocketAddrV4::new(Ipv4Addr::new(203, 0, 113, 7), 40000);
        let response = BindingResponse::decode(&encode_success(id, addr)).unwrap();

        assert_eq!(response.transaction_id, id);
        assert_eq!(response.mapped_address, SocketAddr::V4(addr));
    }

    #[test]
    fn test_decode_xor_mapped_ipv6() {
        let id = [0xAB; 12];
        let ip: Ipv6Addr = "2001:db8::1".parse().unwrap();
        let mut mask = MAGIC_COOKIE.to_be_bytes().to_vec();
        mask.extend_from_slice(&id);
        let xored: Vec<u8> = ip.octets().iter().zip(&mask).map(|(a, b)| a ^ b).collect();

        let mut msg = Vec::new();
        msg.extend_from_slice(&BINDING_SUCCESS.to_be_bytes());
        msg.extend_from_slice(&24u16.to_be_bytes());
        msg.extend_from_slice(&MAGIC_COOKIE.to_be_bytes());
        msg.extend_from_slice(&id);
        msg.extend_from_slice(&ATTR_XOR_MAPPED_ADDRESS.to_be_bytes());
        msg.extend_from_slice(&20u16.to_be_bytes());
        msg.extend_from_slice(&[0x00, FAMILY_IPV6]);
        msg.extend_from_slice(&(3478u16 ^ 0x2112).to_be_bytes());
        msg.extend_from_slice(&xored);

        let response = BindingResponse::decode(&msg).unwrap();
        assert_eq!(response.mapped_address, SocketAddr::new(IpAddr::V6(ip), 3478));
    }

    #[test]
    fn test_plain_mapped_address_after_unknown_attribute() {
        let mut msg = Vec::new();
        msg.extend_from_slice(&BINDING_SUCCESS.to_be_bytes());
        msg.extend_from_slice(&20u16.to_be_bytes());
        msg.extend_from_slice(&MAGIC_COOKIE.to_be_bytes());
        msg.extend_from_slice(&[1u8; 12]);
        // SOFTWARE, 3 bytes padded to 4.
        msg.extend_from_slice(&[0x80, 0x22, 0x00, 0x03, b'a', b'b', b'c', 0x00]);
        msg.extend_from_slice(&ATTR_MAPPED_ADDRESS.to_be_bytes());
        msg.extend_from_slice(&8u16.to_be_bytes());
        msg.extend_from_slice(&[0x00, FAMILY_IPV4, 0x1F, 0x90, 198, 51, 100, 2]);

        let response = BindingResponse::decode(&msg).unwrap();
        assert_eq!(response.mapped_address, "198.51.100.2:8080".parse().unwrap());
    }

    #[test]
    fn test_rejects_malformed_responses() {
        assert!(matches!(BindingResponse::decode(&[0u8; 10]), Err(StunError::TooShort(10))));

        let mut bad_cookie = encode_success([0; 12], SocketAddrV4::new(Ipv4Addr::LOCALHOST, 1));
        bad_cookie[4] = 0;
        assert!(matches!(BindingResponse::decode(&bad_cookie), Err(StunError::BadCookie)));

        let request = BindingRequest::new().encode();
        assert!(matches!(
            BindingResponse::decode(&request),
            Err(StunError::UnexpectedType(0x0001))
        ));

        let mut no_address = encode_success([0; 12], SocketAddrV4::new(Ipv4Addr::LOCALHOST, 1));
        no_address.truncate(STUN_HEADER_SIZE);
        no_address[2..4].copy_from_slice(&[0, 0]);
        assert!(matches!(
            BindingResponse::decode(&no_address),
            Err(StunError::NoMappedAddress)
        ));
    }
}
