//! Lock-free SPSC byte ring (spec §4.6 "Stdout streaming"), backing both the
//! stdout pipe and the stdin pipe fed by `WRITE_STDIN`. Grounded in
//! `OueslatiGhaith-embassy_ipcc_extension`'s use of `bbqueue::BBBuffer` for
//! exactly this IRQ/task producer/consumer boundary.

use bbqueue::{BBBuffer, Consumer, Producer};

/// Owns the backing storage; split once into a producer half (fed by
/// whichever process appends bytes) and a consumer half (drained by the
/// pump that drives the bus), matching `BBBuffer`'s one-shot split contract.
pub struct ByteRing<const N: usize> {
    bb: BBBuffer<N>,
}

impl<const N: usize> ByteRing<N> {
    pub const fn new() -> Self {
        Self { bb: BBBuffer::new() }
    }

    /// Splits the buffer. Callable once; a second call panics, the same
    /// contract `BBBuffer::try_split` gives a caller who ignores the `Err`.
    pub fn split(&'static self) -> (Producer<'static, N>, Consumer<'static, N>) {
        self.bb.try_split().expect("ByteRing split more than once")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn producer_writes_are_visible_to_consumer() {
        static RING: ByteRing<64> = ByteRing::new();
        let (mut p, mut c) = RING.split();
        {
            let mut grant = p.grant_exact(5).unwrap();
            grant.copy_from_slice(b"hello");
            grant.commit(5);
        }
        let grant = c.read().unwrap();
        assert_eq!(&grant[..5], b"hello");
        grant.release(5);
    }

    #[test]
    fn second_split_panics() {
        static RING: ByteRing<32> = ByteRing::new();
        let _first = RING.split();
        let result = std::panic::catch_unwind(|| RING.split());
        assert!(result.is_err());
    }
}
