//! Discovery service: announcements, sensor values and remote commands.

use std::pin::Pin;
use std::time::Duration;

use futures::Stream;
use serde_json::Value;
use thiserror::Error;

use crate::devices::{CommandArgs, DeviceController};
use crate::mux::topic::{self, TopicError};
use crate::mux::{MuxError, MuxResult, Subscription, TopicMultiplexer};
use crate::rpc::{
    parse_response, HandlerRegistration, RequestHandler, RpcClient, RpcError, RpcResult, RpcServer,
};

use super::announcement::DeviceAnnouncement;
use super::topics::Topics;

/// Errors raised by discovery operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DiscoveryError {
    /// A device, sensor or command name cannot be embedded in a topic.
    #[error("invalid name: {0}")]
    InvalidName(#[from] TopicError),

    #[error("failed to encode payload: {0}")]
    Encode(String),

    /// Another device already uses this name on the node.
    #[error("device name '{0}' is already registered")]
    NameTaken(String),

    #[error(transparent)]
    Mux(#[from] MuxError),
}

/// Convenient Result alias for discovery operations.
pub type DiscoveryResult<T> = Result<T, DiscoveryError>;

/// Stream of well-formed remote announcements.
pub type AnnouncementStream = Pin<Box<dyn Stream<Item = DeviceAnnouncement> + Send>>;

/// Stream of decoded sensor values.
pub type SensorValueStream = Pin<Box<dyn Stream<Item = Value> + Send>>;

/// Discovery protocol operations for one namespace.
#[derive(Clone)]
pub struct DiscoveryService {
    topics: Topics,
    mux: TopicMultiplexer,
    client: RpcClient,
    server: RpcServer,
}

impl DiscoveryService {
    pub fn new(topics: Topics, mux: TopicMultiplexer, client: RpcClient, server: RpcServer) -> Self {
        Self {
            topics,
            mux,
            client,
            server,
        }
    }

    #[must_use]
    pub fn topics(&self) -> &Topics {
        &self.topics
    }

    #[must_use]
    pub fn multiplexer(&self) -> &TopicMultiplexer {
        &self.mux
    }

    #[must_use]
    pub fn client(&self) -> &RpcClient {
        &self.client
    }

    /// Publishes a full snapshot of `device` on its announcement topic.
    pub async fn announce(&self, device: &dyn DeviceController) -> DiscoveryResult<()> {
        self.publish_announcement(&DeviceAnnouncement::from_controller(device))
            .await
    }

    /// Publishes an already built announcement.
    pub async fn publish_announcement(
        &self,
        announcement: &DeviceAnnouncement,
    ) -> DiscoveryResult<()> {
        topic::validate_level(&announcement.name)?;
        let payload = announcement
            .encode()
            .map_err(|e| DiscoveryError::Encode(e.to_string()))?;
        self.mux
            .publish(&self.topics.device(&announcement.name), payload)
            .await?;
        log::debug!("[Discovery] Announced '{}'", announcement.name);
        Ok(())
    }

    /// Asks every node to re-announce its devices.
    pub async fn request_discovery(&self) -> MuxResult<()> {
        log::debug!("[Discovery] Requesting announcements");
        self.mux.publish(&self.topics.discovery(), "").await
    }

    /// Subscribes to discovery requests. Payloads carry no meaning.
    pub fn discovery_requests(&self) -> MuxResult<Subscription> {
        self.mux.subscribe(&self.topics.discovery())
    }

    /// Subscribes to every announcement in the namespace.
    ///
    /// Malformed payloads, and payloads whose name does not match their topic,
    /// are logged and skipped. The stream ends on a broker-level failure.
    pub fn announcements(&self) -> MuxResult<AnnouncementStream> {
        let mut subscription = self.mux.subscribe(&self.topics.all_devices())?;
        let topics = self.topics.clone();

        Ok(Box::pin(async_stream::stream! {
            while let Some(delivery) = subscription.recv().await {
                let message = match delivery {
                    Ok(message) => message,
                    Err(e) => {
                        log::warn!("[Discovery] Announcement stream failed: {}", e);
                        break;
                    }
                };

                let announcement = match DeviceAnnouncement::decode(&message.payload) {
                    Ok(announcement) => announcement,
                    Err(e) => {
                        log::warn!(
                            "[Discovery] Skipping malformed announcement on '{}': {}",
                            message.topic,
                            e
                        );
                        continue;
                    }
                };

                if topics.device_name(&message.topic) != Some(announcement.name.as_str()) {
                    log::warn!(
                        "[Discovery] Skipping announcement of '{}' published on '{}'",
                        announcement.name,
                        message.topic
                    );
                    continue;
                }
                yield announcement;
            }
        }))
    }

    /// Publishes a sensor value (plain JSON, no envelope).
    pub async fn publish_sensor_value(
        &self,
        device: &str,
        sensor: &str,
        value: &Value,
    ) -> DiscoveryResult<()> {
        topic::validate_level(device)?;
        topic::validate_level(sensor)?;
        let payload =
            serde_json::to_vec(value).map_err(|e| DiscoveryError::Encode(e.to_string()))?;
        self.mux
            .publish(&self.topics.sensor_value(device, sensor), payload)
            .await?;
        Ok(())
    }

    /// Subscribes to a remote sensor's value topic.
    ///
    /// Payloads that are not JSON are logged and skipped.
    pub fn watch_sensor_value(&self, device: &str, sensor: &str) -> DiscoveryResult<SensorValueStream> {
        topic::validate_level(device)?;
        topic::validate_level(sensor)?;
        let mut subscription = self.mux.subscribe(&self.topics.sensor_value(device, sensor))?;

        Ok(Box::pin(async_stream::stream! {
            while let Some(delivery) = subscription.recv().await {
                let message = match delivery {
                    Ok(message) => message,
                    Err(e) => {
                        log::warn!("[Discovery] Value stream '{}' failed: {}", subscription.filter(), e);
                        break;
                    }
                };
                match serde_json::from_slice::<Value>(&message.payload) {
                    Ok(value) => {
                        yield value;
                    }
                    Err(e) => {
                        log::warn!(
                            "[Discovery] Skipping malformed value on '{}': {}",
                            message.topic,
                            e
                        );
                    }
                }
            }
        }))
    }

    /// Invokes a command on a remote device.
    ///
    /// Named arguments travel as a JSON object body; the reply is parsed as
    /// JSON. An `{"error": ...}` reply becomes [`RpcError::Application`](crate::rpc::RpcError::Application).
    pub async fn call_command(
        &self,
        device: &str,
        command: &str,
        args: &CommandArgs,
        timeout: Option<Duration>,
    ) -> RpcResult<Value> {
        for level in [device, command] {
            topic::validate_level(level).map_err(|e| RpcError::InvalidTopic(e.to_string()))?;
        }
        let body = Value::Object(args.clone()).to_string();
        let reply = self
            .client
            .call(&self.topics.command(device, command), body, timeout)
            .await?;
        parse_response(&reply)
    }

    /// Serves a command topic with `handler`.
    pub fn serve_command<H>(
        &self,
        device: &str,
        command: &str,
        handler: H,
    ) -> DiscoveryResult<HandlerRegistration>
    where
        H: RequestHandler + 'static,
    {
        topic::validate_level(device)?;
        topic::validate_level(command)?;
        Ok(self
            .server
            .handle(&self.topics.command(device, command), handler)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rpc::HandlerError;
    use crate::runtime::TokioSpawner;
    use crate::test_fixtures::{connect, KITCHEN_LIGHT_ANNOUNCEMENT};
    use crate::transport::LocalBroker;
    use futures::StreamExt;
    use serde_json::json;

    fn service(broker: &LocalBroker) -> DiscoveryService {
        let mux = connect(broker);
        let spawner = TokioSpawner::current();
        let topics = Topics::new("ns");
        DiscoveryService::new(
            topics.clone(),
            mux.clone(),
            RpcClient::new(mux.clone(), topics.response_prefix(), spawner.clone()),
            RpcServer::new(mux, spawner),
        )
    }

    #[tokio::test]
    async fn announcements_skip_malformed_payloads() {
        let broker = LocalBroker::new();
        let observer = service(&broker);
        let mut announcements = observer.announcements().unwrap();
        observer.multiplexer().flush().await.unwrap();

        let peer = connect(&broker);
        peer.publish("ns/device/broken", "{not json").await.unwrap();
        peer.publish("ns/device/other-name", KITCHEN_LIGHT_ANNOUNCEMENT)
            .await
            .unwrap();
        peer.publish("ns/device/kitchen-light", KITCHEN_LIGHT_ANNOUNCEMENT)
            .await
            .unwrap();

        let announcement = announcements.next().await.unwrap();
        assert_eq!(announcement.name, "kitchen-light");
        assert_eq!(announcement.sensors.len(), 2);
    }

    #[tokio::test]
    async fn discovery_request_reaches_subscribers() {
        let broker = LocalBroker::new();
        let node = service(&broker);
        let mut requests = node.discovery_requests().unwrap();
        node.multiplexer().flush().await.unwrap();

        service(&broker).request_discovery().await.unwrap();
        let request = requests.recv().await.unwrap().unwrap();
        assert_eq!(request.topic, "ns/discovery");
        assert!(request.payload.is_empty());
    }

    #[tokio::test]
    async fn sensor_values_round_trip_as_plain_json() {
        let broker = LocalBroker::new();
        let watcher = service(&broker);
        let mut values = watcher.watch_sensor_value("hall", "temp").unwrap();
        watcher.multiplexer().flush().await.unwrap();

        let publisher = service(&broker);
        let peer = connect(&broker);
        peer.publish("ns/device/hall/sensor/temp/value", "nope")
            .await
            .unwrap();
        publisher
            .publish_sensor_value("hall", "temp", &json!(19.5))
            .await
            .unwrap();

        assert_eq!(values.next().await, Some(json!(19.5)));
        assert_eq!(
            &broker.published_to("ns/device/hall/sensor/temp/value")[1][..],
            b"19.5"
        );
    }

    #[tokio::test]
    async fn call_command_sends_named_args_and_parses_reply() {
        async fn dim(body: String) -> Result<String, HandlerError> {
            let args: Value = serde_json::from_str(&body)?;
            match args["level"].as_i64() {
                Some(level) if level <= 100 => Ok(json!({ "level": level }).to_string()),
                _ => Err(HandlerError::from("level out of range")),
            }
        }

        let broker = LocalBroker::new();
        let device_node = service(&broker);
        let _registration = device_node.serve_command("lamp", "dim", dim).unwrap();
        device_node.multiplexer().flush().await.unwrap();

        let caller = service(&broker);
        let mut args = CommandArgs::new();
        args.insert("level".into(), json!(40));
        let reply = caller
            .call_command("lamp", "dim", &args, Some(Duration::from_secs(1)))
            .await
            .unwrap();
        assert_eq!(reply, json!({"level": 40}));

        args.insert("level".into(), json!(400));
        assert_eq!(
            caller
                .call_command("lamp", "dim", &args, Some(Duration::from_secs(1)))
                .await,
            Err(RpcError::Application("level out of range".into()))
        );
    }

    #[tokio::test]
    async fn names_with_separators_are_rejected() {
        let broker = LocalBroker::new();
        let node = service(&broker);
        assert!(matches!(
            node.publish_sensor_value("a/b", "temp", &json!(1)).await,
            Err(DiscoveryError::InvalidName(_))
        ));
        assert!(matches!(
            node.serve_command("lamp", "#", |b: String| async move { Ok::<_, HandlerError>(b) }),
            Err(DiscoveryError::InvalidName(_))
        ));
    }

    #[tokio::test]
    async fn command_calls_with_separators_publish_nothing() {
        let broker = LocalBroker::new();
        let caller = service(&broker);
        let args = CommandArgs::new();

        for (device, command) in [("lamp", "a/b"), ("kitchen/lamp", "dim"), ("lamp", "+")] {
            let result = caller
                .call_command(device, command, &args, Some(Duration::from_millis(50)))
                .await;
            assert!(matches!(result, Err(RpcError::InvalidTopic(_))), "{device}.{command}");
        }
        caller.multiplexer().flush().await.unwrap();
        assert_eq!(broker.stats().published_total, 0);
        assert_eq!(broker.stats().subscribes_total, 0);
    }
}
