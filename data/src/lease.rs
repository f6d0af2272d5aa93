// Copyright (c) 2024 Botho Foundation

//! Destinations, leases and lease sets.

use crate::{
    certificate::Certificate,
    error::{ensure_remaining, DataError, DataResult},
    hash::{Hash, TunnelId},
    keys::{PrivateKey, PublicKey},
};
use bytes::{Buf, BufMut};
use rand::{CryptoRng, RngCore};
use serde::{Deserialize, Serialize};

/// Maximum number of leases in a lease set.
pub const MAX_LEASES: usize = 16;

/// Cryptographic identity of an application endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Destination {
    public_key: PublicKey,
    signing_key: [u8; 32],
    certificate: Certificate,
}

impl Destination {
    pub fn new(public_key: PublicKey, signing_key: [u8; 32], certificate: Certificate) -> Self {
        Self {
            public_key,
            signing_key,
            certificate,
        }
    }

    /// Generate a fresh destination together with its decryption key.
    pub fn random<R: RngCore + CryptoRng>(rng: &mut R) -> (Self, PrivateKey) {
        let private_key = PrivateKey::random(rng);
        let mut signing_key = [0u8; 32];
        rng.fill_bytes(&mut signing_key);
        let dest = Self::new(private_key.public_key(), signing_key, Certificate::NULL);
        (dest, private_key)
    }

    pub fn public_key(&self) -> &PublicKey {
        &self.public_key
    }

    pub fn certificate(&self) -> &Certificate {
        &self.certificate
    }

    /// SHA-256 over the encoded destination.
    pub fn calculate_hash(&self) -> Hash {
        let mut out = Vec::with_capacity(64 + self.certificate.encoded_len());
        self.write(&mut out);
        Hash::digest(&out)
    }

    pub fn write(&self, buf: &mut impl BufMut) {
        self.public_key.write(buf);
        buf.put_slice(&self.signing_key);
        self.certificate.write(buf);
    }

    pub fn read(buf: &mut impl Buf) -> DataResult<Self> {
        let public_key = PublicKey::read(buf)?;
        ensure_remaining(buf, 32)?;
        let mut signing_key = [0u8; 32];
        buf.copy_to_slice(&mut signing_key);
        let certificate = Certificate::read(buf)?;
        Ok(Self::new(public_key, signing_key, certificate))
    }
}

/// One inbound path to a destination: the gateway of one of its inbound
/// tunnels, the tunnel id at that gateway, and when the tunnel expires.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Lease {
    pub gateway: Hash,
    pub tunnel_id: TunnelId,
    /// Milliseconds since the epoch.
    pub end_date: u64,
}

impl Lease {
    pub fn new(gateway: Hash, tunnel_id: TunnelId, end_date: u64) -> Self {
        Self {
            gateway,
            tunnel_id,
            end_date,
        }
    }

    /// True if the lease ended more than `fudge` ms before `now`.
    pub fn is_expired(&self, now: u64, fudge: u64) -> bool {
        self.end_date < now.saturating_sub(fudge)
    }

    /// Same gateway and tunnel, ignoring the end date which changes between
    /// publications.
    pub fn same_path(&self, other: &Lease) -> bool {
        self.tunnel_id == other.tunnel_id && self.gateway == other.gateway
    }

    pub fn write(&self, buf: &mut impl BufMut) {
        self.gateway.write(buf);
        self.tunnel_id.write(buf);
        buf.put_u64(self.end_date);
    }

    pub fn read(buf: &mut impl Buf) -> DataResult<Self> {
        let gateway = Hash::read(buf)?;
        let tunnel_id = TunnelId::read(buf)?;
        ensure_remaining(buf, 8)?;
        Ok(Self::new(gateway, tunnel_id, buf.get_u64()))
    }
}

/// Published set of a destination's current leases plus the key to encrypt
/// garlic messages to it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LeaseSet {
    destination: Destination,
    encryption_key: PublicKey,
    leases: Vec<Lease>,
}

impl LeaseSet {
    pub fn new(
        destination: Destination,
        encryption_key: PublicKey,
        leases: Vec<Lease>,
    ) -> DataResult<Self> {
        if leases.len() > MAX_LEASES {
            return Err(DataError::TooManyLeases(leases.len()));
        }
        Ok(Self {
            destination,
            encryption_key,
            leases,
        })
    }

    pub fn destination(&self) -> &Destination {
        &self.destination
    }

    pub fn encryption_key(&self) -> &PublicKey {
        &self.encryption_key
    }

    pub fn leases(&self) -> &[Lease] {
        &self.leases
    }

    pub fn lease_count(&self) -> usize {
        self.leases.len()
    }

    /// Hash of the owning destination; the NetDB key of this lease set.
    pub fn hash(&self) -> Hash {
        self.destination.calculate_hash()
    }

    pub fn earliest_lease_date(&self) -> u64 {
        self.leases.iter().map(|l| l.end_date).min().unwrap_or(0)
    }

    pub fn latest_lease_date(&self) -> u64 {
        self.leases.iter().map(|l| l.end_date).max().unwrap_or(0)
    }

    /// True while at least one lease ends after `now - fudge`.
    pub fn is_current(&self, now: u64, fudge: u64) -> bool {
        self.latest_lease_date() > now.saturating_sub(fudge)
    }

    pub fn write(&self, buf: &mut impl BufMut) {
        self.destination.write(buf);
        self.encryption_key.write(buf);
        buf.put_u8(self.leases.len() as u8);
        for lease in &self.leases {
            lease.write(buf);
        }
    }

    pub fn read(buf: &mut impl Buf) -> DataResult<Self> {
        let destination = Destination::read(buf)?;
        let encryption_key = PublicKey::read(buf)?;
        ensure_remaining(buf, 1)?;
        let count = buf.get_u8() as usize;
        if count > MAX_LEASES {
            return Err(DataError::TooManyLeases(count));
        }
        let leases = (0..count)
            .map(|_| Lease::read(buf))
            .collect::<DataResult<Vec<_>>>()?;
        Self::new(destination, encryption_key, leases)
    }
}
