//! Stdout send pump (spec §4.6 "Stdout streaming"): drains the stdout ring
//! and frames each notification with the `WRITE_STDOUT` opcode. A new send
//! starts only after the driver reports the previous one done.

use bbqueue::Consumer;

use crate::config::BLE_MTU;
use crate::hal::{BluetoothDriver, SendCtx};

use super::opcode::EventOpcode;

pub struct SendPump<const N: usize> {
    consumer: Consumer<'static, N>,
    scratch: [u8; BLE_MTU],
    in_flight: usize,
}

impl<const N: usize> SendPump<N> {
    pub fn new(consumer: Consumer<'static, N>) -> Self {
        Self {
            consumer,
            scratch: [0u8; BLE_MTU],
            in_flight: 0,
        }
    }

    /// Drives one step: if a send is outstanding, checks for completion; if
    /// none is outstanding, starts one from whatever is queued. Returns
    /// `true` if a notification was sent this call.
    pub fn pump<B: BluetoothDriver>(&mut self, bt: &mut B) -> bool {
        if self.in_flight > 0 {
            if bt.send_done() {
                if let Ok(g) = self.consumer.read() {
                    g.release(self.in_flight);
                }
                self.in_flight = 0;
            } else {
                return false;
            }
        }

        let grant = match self.consumer.read() {
            Ok(g) => g,
            Err(_) => return false,
        };
        let n = grant.len().min(BLE_MTU - 1);
        self.scratch[0] = EventOpcode::WriteStdout as u8;
        self.scratch[1..1 + n].copy_from_slice(&grant[..n]);
        // Dropping `grant` without calling `release` auto-releases zero
        // bytes, so the chunk stays queued until `send_done` confirms it
        // left the radio and a later grant releases it for real.
        drop(grant);

        if bt.send(SendCtx {
            data: &self.scratch[..1 + n],
        }) {
            self.in_flight = n;
            true
        } else {
            false
        }
    }

    /// Link dropped: discard whatever is queued so a reconnect starts clean
    /// (spec §4.6 "Connection lifecycle").
    pub fn reset(&mut self) {
        if let Ok(g) = self.consumer.read() {
            let n = g.len();
            g.release(n);
        }
        self.in_flight = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ble::ring::ByteRing;

    struct FakeBt {
        sent: heapless::Vec<u8, 256>,
        done: bool,
        accept: bool,
    }
    impl BluetoothDriver for FakeBt {
        fn is_connected(&self) -> bool {
            true
        }
        fn send(&mut self, ctx: SendCtx) -> bool {
            if !self.accept {
                return false;
            }
            self.sent.extend_from_slice(ctx.data).ok();
            self.done = false;
            true
        }
        fn send_done(&mut self) -> bool {
            let d = self.done;
            d
        }
        fn start_advertising(&mut self, _enable: bool) {}
        fn is_advertising(&self) -> bool {
            false
        }
        fn poll_receive(&mut self, _buf: &mut [u8]) -> Option<usize> {
            None
        }
    }

    #[test]
    fn pump_prefixes_write_stdout_opcode() {
        static RING: ByteRing<64> = ByteRing::new();
        let (mut p, c) = RING.split();
        {
            let mut grant = p.grant_exact(3).unwrap();
            grant.copy_from_slice(b"abc");
            grant.commit(3);
        }
        let mut pump: SendPump<64> = SendPump::new(c);
        let mut bt = FakeBt {
            sent: heapless::Vec::new(),
            done: true,
            accept: true,
        };
        assert!(pump.pump(&mut bt));
        assert_eq!(&bt.sent[..4], &[0x01, b'a', b'b', b'c']);
    }

    #[test]
    fn pump_waits_for_previous_send_to_complete() {
        static RING: ByteRing<64> = ByteRing::new();
        let (mut p, c) = RING.split();
        {
            let mut grant = p.grant_exact(2).unwrap();
            grant.copy_from_slice(b"xy");
            grant.commit(2);
        }
        let mut pump: SendPump<64> = SendPump::new(c);
        let mut bt = FakeBt {
            sent: heapless::Vec::new(),
            done: true,
            accept: true,
        };
        assert!(pump.pump(&mut bt));
        bt.done = false;
        assert!(!pump.pump(&mut bt));
        bt.done = true;
        assert!(!pump.pump(&mut bt)); // no more data queued
    }
}
