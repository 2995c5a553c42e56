//! Blocking poll loops that run a sender or receiver over a link.
//!
//! Each iteration writes at most one burst (sender) or every queued control
//! line (receiver), drains whatever input is pending, then checks timers.
//! Cancellation is honored at every iteration boundary.

use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Instant;

use tracing::{info, instrument, warn};

use crate::protocol::{FinalizedProfile, TransmitInstructions, package_profile};

use super::error::TransportError;
use super::link::Link;
use super::receiver::{ReceiveOutcome, Receiver, ReceiverConfig};
use super::sender::{Sender, SenderConfig, TransferStatus};

/// Package `profile` and transmit it until every packet is acknowledged.
#[instrument(
    level = "info",
    skip_all,
    fields(profiler_serial = profile.profiler_serial(), profile_id = profile.profile_id())
)]
pub fn transmit_profile<L: Link>(
    link: &mut L,
    profile: &FinalizedProfile,
    instructions: &TransmitInstructions,
    config: &SenderConfig,
    cancel: &AtomicBool,
) -> TransferStatus {
    let packaged = match package_profile(profile, instructions) {
        Ok(packaged) => packaged,
        Err(err) => {
            warn!(error = %err, "packaging failed");
            return TransferStatus::PackageFail;
        }
    };
    let mut sender = match Sender::new(&packaged, config.clone(), Instant::now()) {
        Ok(sender) => sender,
        Err(err) => {
            warn!(error = %err, "encoding failed");
            return TransferStatus::PackageFail;
        }
    };

    let mut buf = vec![0u8; config.read_chunk.max(1)];
    loop {
        if cancel.load(Ordering::Relaxed) {
            info!("transfer cancelled");
            return TransferStatus::Cancelled;
        }

        let mut progressed = false;
        if let Some(burst) = sender.poll_transmit() {
            if let Err(err) = link.write_all(&burst, config.write_timeout) {
                warn!(error = %err, "burst write failed");
                return TransferStatus::ModemFail;
            }
            progressed = true;
        }

        let (read, link_error) = drain(link, &mut buf, |bytes| {
            sender.handle_input(bytes, Instant::now());
        });
        progressed |= read;

        if let Some(status) = sender.poll_status(Instant::now()) {
            info!(%status, "transfer finished");
            return status;
        }
        if let Some(err) = link_error {
            warn!(error = %err, "link failed");
            return TransferStatus::ModemFail;
        }
        if !progressed {
            thread::sleep(config.poll_interval);
        }
    }
}

/// Rebuild profiles from the link until the profiler hangs up or goes quiet.
///
/// Completion alone does not end the session: the last `RXED` may be lost,
/// and the sender can only recover by soliciting it again. The session ends
/// when the link closes or after `session_timeout` without a burst, and the
/// outcome is `Complete` if every profile was rebuilt by then.
#[instrument(level = "info", skip_all)]
pub fn receive_session<L: Link>(
    link: &mut L,
    config: &ReceiverConfig,
    cancel: &AtomicBool,
) -> ReceiveOutcome {
    let mut receiver = Receiver::new(config.clone(), Instant::now());
    let mut buf = vec![0u8; config.read_chunk.max(1)];
    let mut reported = false;
    loop {
        if cancel.load(Ordering::Relaxed) {
            info!("receive cancelled");
            return ReceiveOutcome::Cancelled {
                partial: receiver.into_profiles(),
            };
        }

        let (mut progressed, mut link_error) = drain(link, &mut buf, |bytes| {
            receiver.handle_input(bytes, Instant::now());
        });

        let now = Instant::now();
        receiver.poll_timers(now);
        while link_error.is_none() {
            let Some(line) = receiver.poll_transmit() else {
                break;
            };
            if let Err(err) = link.write_all(&line, config.write_timeout) {
                link_error = Some(err);
            }
            progressed = true;
        }

        let complete = receiver.is_complete();
        if complete && !reported {
            info!(rejected = receiver.rejected(), "all profiles rebuilt; answering until hang-up");
            reported = true;
        }
        if let Some(err) = link_error {
            if complete {
                info!(reason = %err, "session complete");
                return ReceiveOutcome::Complete(receiver.into_profiles());
            }
            warn!(error = %err, "link failed");
            return ReceiveOutcome::Disconnected {
                partial: receiver.into_profiles(),
            };
        }
        if receiver.is_timed_out(now) {
            if complete {
                info!("session complete; link quiet");
                return ReceiveOutcome::Complete(receiver.into_profiles());
            }
            warn!("session timed out");
            return ReceiveOutcome::TimedOut {
                partial: receiver.into_profiles(),
            };
        }
        if !progressed {
            thread::sleep(config.poll_interval);
        }
    }
}

/// Read until the link has nothing pending; returns whether anything was
/// read and the error that stopped reading, if any.
fn drain<L: Link>(
    link: &mut L,
    buf: &mut [u8],
    mut handle: impl FnMut(&[u8]),
) -> (bool, Option<TransportError>) {
    let mut read = false;
    loop {
        match link.read_available(buf) {
            Ok(0) => return (read, None),
            Ok(n) => {
                handle(&buf[..n]);
                read = true;
            }
            Err(err) => return (read, Some(err)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{ProfileBuilder, SensorType};
    use crate::transport::MemoryLink;
    use std::time::Duration;

    fn profile() -> FinalizedProfile {
        let mut builder = ProfileBuilder::new(770, 12_345);
        let samples: Vec<u8> = (0..3 * 80).map(|i| (i % 97) as u8).collect();
        builder
            .append_samples(SensorType::Starboard, &samples)
            .unwrap();
        builder
            .append_samples(SensorType::Ocr, &[3u8; 2 * 32])
            .unwrap();
        builder.finalize()
    }

    fn fast_sender() -> SenderConfig {
        SenderConfig {
            poll_interval: Duration::from_millis(1),
            quiescence_timeout: Duration::from_secs(10),
            ..SenderConfig::default()
        }
    }

    fn fast_receiver() -> ReceiverConfig {
        ReceiverConfig {
            poll_interval: Duration::from_millis(1),
            session_timeout: Duration::from_secs(10),
            ..ReceiverConfig::default()
        }
    }

    #[test]
    fn sender_and_receiver_complete_over_memory_link() {
        let (mut profiler, mut shore) = MemoryLink::pair();
        let shore_thread = thread::spawn(move || {
            receive_session(&mut shore, &fast_receiver(), &AtomicBool::new(false))
        });

        let source = profile();
        let status = transmit_profile(
            &mut profiler,
            &source,
            &TransmitInstructions::default(),
            &fast_sender(),
            &AtomicBool::new(false),
        );
        assert_eq!(status, TransferStatus::Success);
        profiler.close();

        let outcome = shore_thread.join().unwrap();
        assert!(outcome.is_complete());
        let rebuilt = &outcome.profiles()[0];
        assert_eq!(rebuilt.profile_id(), 12_345);
        assert_eq!(rebuilt.expected_packets(), Some(2));
        assert_eq!(
            rebuilt.data_packet(1).unwrap().payload(),
            source.samples(SensorType::Starboard)
        );
        assert_eq!(
            rebuilt.data_packet(2).unwrap().payload(),
            source.samples(SensorType::Ocr)
        );
    }

    /// Swallows the shore's first acknowledgement of `packet`.
    struct LoseAck {
        inner: MemoryLink,
        packet: &'static [u8],
        lost: bool,
    }

    impl Link for LoseAck {
        fn read_available(&mut self, buf: &mut [u8]) -> Result<usize, TransportError> {
            self.inner.read_available(buf)
        }

        fn write_all(&mut self, bytes: &[u8], timeout: Duration) -> Result<(), TransportError> {
            if !self.lost && bytes.starts_with(b"RXED") && bytes[15..21] == *self.packet {
                self.lost = true;
                return Ok(());
            }
            self.inner.write_all(bytes, timeout)
        }
    }

    #[test]
    fn lost_final_acknowledgement_is_answered_after_completion() {
        let (mut profiler, shore) = MemoryLink::pair();
        let shore_thread = thread::spawn(move || {
            let mut link = LoseAck {
                inner: shore,
                packet: b",0002,",
                lost: false,
            };
            let outcome = receive_session(&mut link, &fast_receiver(), &AtomicBool::new(false));
            (outcome, link.lost)
        });

        let config = SenderConfig {
            solicit_interval: Duration::from_millis(50),
            ..fast_sender()
        };
        let status = transmit_profile(
            &mut profiler,
            &profile(),
            &TransmitInstructions::default(),
            &config,
            &AtomicBool::new(false),
        );
        assert_eq!(status, TransferStatus::Success);
        profiler.close();

        let (outcome, lost) = shore_thread.join().unwrap();
        assert!(lost);
        assert!(matches!(outcome, ReceiveOutcome::Complete(_)));
    }

    #[test]
    fn complete_session_ends_on_quiet_link() {
        let (mut profiler, mut shore) = MemoryLink::pair();
        let config = ReceiverConfig {
            session_timeout: Duration::from_millis(500),
            ..fast_receiver()
        };
        let shore_thread =
            thread::spawn(move || receive_session(&mut shore, &config, &AtomicBool::new(false)));

        let status = transmit_profile(
            &mut profiler,
            &profile(),
            &TransmitInstructions::default(),
            &fast_sender(),
            &AtomicBool::new(false),
        );
        assert_eq!(status, TransferStatus::Success);
        // The profiler stays connected; silence ends the session.
        let outcome = shore_thread.join().unwrap();
        assert!(matches!(outcome, ReceiveOutcome::Complete(_)));
    }

    #[test]
    fn bad_instructions_fail_packaging_before_sending() {
        let (mut profiler, shore) = MemoryLink::pair();
        let instructions = TransmitInstructions::identity(100);
        let status = transmit_profile(
            &mut profiler,
            &profile(),
            &instructions,
            &fast_sender(),
            &AtomicBool::new(false),
        );
        assert_eq!(status, TransferStatus::PackageFail);
        assert_eq!(shore.pending().unwrap(), 0);
    }

    #[test]
    fn cancelled_before_first_poll() {
        let (mut profiler, mut shore) = MemoryLink::pair();
        let cancel = AtomicBool::new(true);
        let status = transmit_profile(
            &mut profiler,
            &profile(),
            &TransmitInstructions::default(),
            &fast_sender(),
            &cancel,
        );
        assert_eq!(status, TransferStatus::Cancelled);
        let outcome = receive_session(&mut shore, &fast_receiver(), &cancel);
        assert!(matches!(outcome, ReceiveOutcome::Cancelled { partial } if partial.is_empty()));
    }

    #[test]
    fn closed_link_is_a_modem_failure() {
        let (mut profiler, shore) = MemoryLink::pair();
        shore.close();
        let status = transmit_profile(
            &mut profiler,
            &profile(),
            &TransmitInstructions::default(),
            &fast_sender(),
            &AtomicBool::new(false),
        );
        assert_eq!(status, TransferStatus::ModemFail);
    }

    #[test]
    fn silent_link_times_out() {
        let (_profiler, mut shore) = MemoryLink::pair();
        let config = ReceiverConfig {
            session_timeout: Duration::from_millis(30),
            ..fast_receiver()
        };
        let outcome = receive_session(&mut shore, &config, &AtomicBool::new(false));
        assert!(matches!(outcome, ReceiveOutcome::TimedOut { .. }));
    }
}
