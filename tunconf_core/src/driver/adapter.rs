//! Per-handle driver access: apply, fetch and the adapter state toggle.

use tracing::{debug, instrument, warn};

use super::error::{DriverError, DriverResult, ExchangeError};
use super::exchange::{AdapterHandle, AdapterState, Exchange, Operation};
use crate::config::ExchangeConfig;
use crate::model::{build_set_request, decode_config, DriverConfig, Interface, Peer};
use crate::proto::{ConfigBuffer, ProtoError};

/// A tunnel adapter reached through an [`Exchange`].
///
/// The adapter remembers the size the driver last reported for its
/// configuration so the next fetch usually needs a single call.
#[derive(Debug)]
pub struct Adapter<E> {
    handle: AdapterHandle,
    exchange: E,
    config: ExchangeConfig,
    size_hint: Option<usize>,
}

impl<E: Exchange> Adapter<E> {
    pub fn new(handle: AdapterHandle, exchange: E) -> Self {
        Self::with_config(handle, exchange, ExchangeConfig::default())
    }

    pub fn with_config(handle: AdapterHandle, exchange: E, config: ExchangeConfig) -> Self {
        Adapter {
            handle,
            exchange,
            config,
            size_hint: None,
        }
    }

    pub fn handle(&self) -> AdapterHandle {
        self.handle
    }

    pub fn exchange(&self) -> &E {
        &self.exchange
    }

    /// Size the next fetch will start with
    pub fn size_hint(&self) -> usize {
        self.size_hint.unwrap_or(self.config.initial_get_size)
    }

    /// Send an assembled configuration buffer. No retry.
    #[instrument(level = "debug", skip_all, fields(handle = %self.handle, len = buffer.len()))]
    pub fn apply(&self, buffer: &ConfigBuffer) -> DriverResult<()> {
        buffer.len_u32()?;
        self.call(Operation::SetConfiguration(buffer.as_bytes()))?;
        Ok(())
    }

    /// Encode `interface` and `peers`, then [`apply`](Self::apply) them
    pub fn set_configuration(&self, interface: &Interface, peers: &[Peer]) -> DriverResult<()> {
        let buffer = build_set_request(interface, peers)?;
        self.apply(&buffer)
    }

    /// Read and decode the driver's current configuration
    pub fn fetch(&mut self) -> DriverResult<DriverConfig> {
        let buf = self.fetch_raw()?;
        Ok(decode_config(&buf)?)
    }

    /// Read the driver's current configuration without decoding it.
    ///
    /// Grows the buffer while the driver reports it too small, bounded by
    /// `max_get_attempts` calls and `max_get_size` bytes.
    #[instrument(level = "debug", skip_all, fields(handle = %self.handle))]
    pub fn fetch_raw(&mut self) -> DriverResult<Vec<u8>> {
        let limit = self.config.max_get_size;
        let max_attempts = self.config.max_get_attempts.max(1);
        let mut size = self.size_hint().min(limit);
        let mut attempts = 0u32;

        loop {
            attempts += 1;

            let mut buf = vec![0u8; size];
            let operation = Operation::GetConfiguration(&mut buf);
            let name = operation.name();
            match self.exchange.exchange(self.handle, operation) {
                Ok(reported) => {
                    let reported = reported as usize;
                    if reported > buf.len() {
                        warn!(reported, available = buf.len(), "Driver reported more than it wrote");
                        return Err(ProtoError::TruncatedBuffer {
                            offset: 0,
                            needed: reported,
                            available: buf.len(),
                        }
                        .into());
                    }
                    self.size_hint = (reported != 0).then_some(reported);
                    debug!(attempts, reported, "Configuration read");
                    buf.truncate(reported);
                    return Ok(buf);
                }
                Err(ExchangeError::BufferTooSmall { required }) => {
                    if attempts >= max_attempts {
                        warn!(attempts, last_size = size, "Giving up on get configuration");
                        return Err(DriverError::RetryLimitExceeded {
                            attempts,
                            last_size: size,
                        });
                    }
                    let next = (required as usize).max(size.saturating_add(1));
                    if next > limit {
                        warn!(required = next, limit, "Driver configuration exceeds size limit");
                        return Err(DriverError::SizeLimitExceeded {
                            required: next,
                            limit,
                        });
                    }
                    debug!(attempts, size, next, "Buffer too small, retrying");
                    size = next;
                }
                Err(e) => {
                    warn!(operation = name, error = %e, "Driver exchange failed");
                    return Err(e.into());
                }
            }
        }
    }

    /// Bring the adapter up or down. No retry.
    #[instrument(level = "debug", skip(self), fields(handle = %self.handle))]
    pub fn set_adapter_state(&self, state: AdapterState) -> DriverResult<()> {
        self.call(Operation::SetAdapterState(state))?;
        Ok(())
    }

    fn call(&self, operation: Operation<'_>) -> Result<u32, ExchangeError> {
        let name = operation.name();
        self.exchange
            .exchange(self.handle, operation)
            .inspect_err(|e| warn!(operation = name, error = %e, "Driver exchange failed"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Key, PeerSettings};
    use std::collections::VecDeque;
    use std::sync::Mutex;

    #[derive(Debug, PartialEq, Eq)]
    enum Call {
        Set(Vec<u8>),
        Get(usize),
        State(AdapterState),
    }

    /// Replays canned get-configuration outcomes and records every call
    #[derive(Default)]
    struct Scripted {
        config: Vec<u8>,
        gets: Mutex<VecDeque<Result<(), ExchangeError>>>,
        calls: Mutex<Vec<Call>>,
    }

    impl Scripted {
        fn serving(config: Vec<u8>) -> Self {
            Scripted {
                config,
                ..Default::default()
            }
        }

        fn script(self, outcomes: Vec<Result<(), ExchangeError>>) -> Self {
            *self.gets.lock().unwrap() = outcomes.into();
            self
        }

        fn calls(&self) -> Vec<Call> {
            std::mem::take(&mut *self.calls.lock().unwrap())
        }
    }

    impl Exchange for Scripted {
        fn exchange(
            &self,
            _handle: AdapterHandle,
            operation: Operation<'_>,
        ) -> Result<u32, ExchangeError> {
            match operation {
                Operation::SetConfiguration(buf) => {
                    self.calls.lock().unwrap().push(Call::Set(buf.to_vec()));
                    Ok(buf.len() as u32)
                }
                Operation::SetAdapterState(state) => {
                    self.calls.lock().unwrap().push(Call::State(state));
                    Ok(0)
                }
                Operation::GetConfiguration(buf) => {
                    self.calls.lock().unwrap().push(Call::Get(buf.len()));
                    if let Some(outcome) = self.gets.lock().unwrap().pop_front() {
                        outcome?;
                    }
                    if buf.len() < self.config.len() {
                        return Err(ExchangeError::BufferTooSmall {
                            required: self.config.len() as u32,
                        });
                    }
                    buf[..self.config.len()].copy_from_slice(&self.config);
                    Ok(self.config.len() as u32)
                }
            }
        }
    }

    fn sample_buffer() -> ConfigBuffer {
        let peers = vec![Peer::set(
            Key::new([2; 32]),
            PeerSettings {
                allowed_ips: vec!["10.1.0.0/16".parse().unwrap()],
                ..Default::default()
            },
        )];
        let interface = Interface {
            listen_port: Some(51820),
            ..Default::default()
        };
        build_set_request(&interface, &peers).unwrap()
    }

    #[test]
    fn test_fetch_fits_first_try() {
        let buffer = sample_buffer();
        let mut adapter = Adapter::new(
            AdapterHandle::from_raw(1),
            Scripted::serving(buffer.as_bytes().to_vec()),
        );

        let config = adapter.fetch().unwrap();
        assert_eq!(config.interface.listen_port, Some(51820));
        assert_eq!(adapter.exchange().calls(), vec![Call::Get(512)]);
        assert_eq!(adapter.size_hint(), buffer.len());
    }

    #[test]
    fn test_fetch_grows_to_required_size() {
        let mut config = sample_buffer().into_vec();
        config.resize(4096, 0);
        let mut adapter = Adapter::new(AdapterHandle::from_raw(1), Scripted::serving(config));

        let raw = adapter.fetch_raw().unwrap();
        assert_eq!(raw.len(), 4096);
        assert_eq!(
            adapter.exchange().calls(),
            vec![Call::Get(512), Call::Get(4096)]
        );
        assert_eq!(adapter.size_hint(), 4096);

        adapter.fetch().unwrap();
        assert_eq!(adapter.exchange().calls(), vec![Call::Get(4096)]);
    }

    #[test]
    fn test_fetch_stops_on_permission_denied() {
        let exchange = Scripted::serving(sample_buffer().into_vec())
            .script(vec![Err(ExchangeError::PermissionDenied)]);
        let mut adapter = Adapter::new(AdapterHandle::from_raw(1), exchange);

        let err = adapter.fetch().unwrap_err();
        assert!(matches!(
            err,
            DriverError::Exchange(ExchangeError::PermissionDenied)
        ));
        assert_eq!(adapter.exchange().calls().len(), 1);
        assert_eq!(adapter.size_hint(), 512);
    }

    #[test]
    fn test_fetch_makes_progress_on_stale_required_size() {
        // Required size smaller than the buffer already tried
        let exchange = Scripted::serving(vec![0; 80]).script(vec![
            Err(ExchangeError::BufferTooSmall { required: 16 }),
            Err(ExchangeError::BufferTooSmall { required: 16 }),
        ]);
        let config = ExchangeConfig {
            initial_get_size: 100,
            ..Default::default()
        };
        let mut adapter = Adapter::with_config(AdapterHandle::from_raw(1), exchange, config);

        adapter.fetch_raw().unwrap();
        assert_eq!(
            adapter.exchange().calls(),
            vec![Call::Get(100), Call::Get(101), Call::Get(102)]
        );
    }

    #[test]
    fn test_fetch_retry_limit() {
        let exchange = Scripted::serving(vec![0; 80]).script(
            (0..5)
                .map(|_| Err(ExchangeError::BufferTooSmall { required: 0 }))
                .collect(),
        );
        let config = ExchangeConfig {
            initial_get_size: 64,
            max_get_attempts: 3,
            ..Default::default()
        };
        let mut adapter = Adapter::with_config(AdapterHandle::from_raw(1), exchange, config);

        let err = adapter.fetch_raw().unwrap_err();
        assert!(matches!(
            err,
            DriverError::RetryLimitExceeded {
                attempts: 3,
                last_size: 66
            }
        ));
        assert_eq!(
            adapter.exchange().calls(),
            vec![Call::Get(64), Call::Get(65), Call::Get(66)]
        );
    }

    #[test]
    fn test_fetch_size_limit() {
        let config = ExchangeConfig {
            max_get_size: 1024,
            ..Default::default()
        };
        let mut adapter = Adapter::with_config(
            AdapterHandle::from_raw(1),
            Scripted::serving(vec![0; 2048]),
            config,
        );

        let err = adapter.fetch_raw().unwrap_err();
        assert!(matches!(
            err,
            DriverError::SizeLimitExceeded {
                required: 2048,
                limit: 1024
            }
        ));
        assert_eq!(adapter.exchange().calls(), vec![Call::Get(512)]);
    }

    #[test]
    fn test_zero_reported_size_resets_hint() {
        let mut adapter =
            Adapter::new(AdapterHandle::from_raw(1), Scripted::serving(vec![0u8; 1000]));
        adapter.fetch_raw().unwrap();
        assert_eq!(adapter.size_hint(), 1000);

        adapter.exchange.config = Vec::new();
        let raw = adapter.fetch_raw().unwrap();
        assert!(raw.is_empty());
        assert_eq!(adapter.size_hint(), 512);
    }

    /// Claims a larger result than the buffer it was handed
    struct Overreporting;

    impl Exchange for Overreporting {
        fn exchange(
            &self,
            _handle: AdapterHandle,
            operation: Operation<'_>,
        ) -> Result<u32, ExchangeError> {
            match operation {
                Operation::GetConfiguration(buf) => Ok(buf.len() as u32 + 100),
                _ => Ok(0),
            }
        }
    }

    #[test]
    fn test_overreported_size_is_truncated_buffer() {
        let mut adapter = Adapter::new(AdapterHandle::from_raw(1), Overreporting);

        let err = adapter.fetch_raw().unwrap_err();
        assert!(matches!(
            err,
            DriverError::Proto(ProtoError::TruncatedBuffer {
                offset: 0,
                needed: 612,
                available: 512
            })
        ));
        assert_eq!(adapter.size_hint(), 512);
    }

    #[test]
    fn test_apply_does_not_retry_buffer_too_small() {
        /// Rejects every set with a size requirement
        struct Rejecting(Mutex<u32>);

        impl Exchange for Rejecting {
            fn exchange(
                &self,
                _handle: AdapterHandle,
                _operation: Operation<'_>,
            ) -> Result<u32, ExchangeError> {
                *self.0.lock().unwrap() += 1;
                Err(ExchangeError::BufferTooSmall { required: 4096 })
            }
        }

        let adapter = Adapter::new(AdapterHandle::from_raw(7), Rejecting(Mutex::new(0)));
        let err = adapter.apply(&sample_buffer()).unwrap_err();
        assert!(matches!(
            err,
            DriverError::Exchange(ExchangeError::BufferTooSmall { required: 4096 })
        ));
        assert_eq!(*adapter.exchange().0.lock().unwrap(), 1);
    }

    #[test]
    fn test_empty_result_fails_to_decode() {
        let mut adapter =
            Adapter::new(AdapterHandle::from_raw(1), Scripted::serving(Vec::new()));
        assert!(matches!(
            adapter.fetch(),
            Err(DriverError::Proto(ProtoError::TruncatedBuffer { .. }))
        ));
    }

    #[test]
    fn test_apply_sends_buffer_once() {
        let buffer = sample_buffer();
        let adapter = Adapter::new(AdapterHandle::from_raw(7), Scripted::default());
        adapter.apply(&buffer).unwrap();
        assert_eq!(
            adapter.exchange().calls(),
            vec![Call::Set(buffer.as_bytes().to_vec())]
        );
    }

    #[test]
    fn test_set_configuration_encodes() {
        let adapter = Adapter::new(AdapterHandle::from_raw(7), Scripted::default());
        adapter
            .set_configuration(&Interface::default(), &[Peer::remove(Key::new([1; 32]))])
            .unwrap();
        match adapter.exchange().calls().as_slice() {
            [Call::Set(bytes)] => assert_eq!(bytes.len(), 80 + 136),
            other => panic!("unexpected calls: {other:?}"),
        }
    }

    #[test]
    fn test_set_adapter_state() {
        let adapter = Adapter::new(AdapterHandle::from_raw(7), Scripted::default());
        adapter.set_adapter_state(AdapterState::Up).unwrap();
        adapter.set_adapter_state(AdapterState::Down).unwrap();
        assert_eq!(
            adapter.exchange().calls(),
            vec![Call::State(AdapterState::Up), Call::State(AdapterState::Down)]
        );
        assert_eq!(AdapterState::Up.as_raw(), 1);
        assert_eq!(AdapterState::Down.as_raw(), 0);
    }
}
