//! Command builders
//!
//! Pure constructors for the commands a client sends. Nothing here touches
//! the session; the connector registers pending invokes and picks chunk
//! streams.

use crate::amf::{AmfObject, AmfValue};
use crate::protocol::constants::*;
use crate::protocol::message::{Command, DataMessage};

use super::config::LinkConfig;

/// Transaction id of the connect command
pub const CONNECT_TRANSACTION_ID: u32 = 1;

const CAPABILITIES: f64 = 15.0;
const AUDIO_CODECS: f64 = 3191.0;
const VIDEO_CODECS: f64 = 252.0;
const VIDEO_FUNCTION: f64 = 1.0;

/// `connect` with the link's command object, auth and extra arguments
pub fn connect(link: &LinkConfig) -> Command {
    let mut obj = AmfObject::new().with("app", link.app.as_str());
    if link.publish {
        obj.push("type", "nonprivate");
    }
    obj.push("flashVer", link.flash_ver.as_str());
    if let Some(swf_url) = &link.swf_url {
        obj.push("swfUrl", swf_url.as_str());
    }
    obj.push("tcUrl", link.tc_url.as_str());

    // Players advertise their capabilities, publishers do not
    if !link.publish {
        obj.push("fpad", false);
        obj.push("capabilities", CAPABILITIES);
        obj.push("audioCodecs", AUDIO_CODECS);
        obj.push("videoCodecs", VIDEO_CODECS);
        obj.push("videoFunction", VIDEO_FUNCTION);
        if let Some(page_url) = &link.page_url {
            obj.push("pageUrl", page_url.as_str());
        }
    }
    obj.push("objectEncoding", 0.0);

    let mut cmd = Command::new(CMD_CONNECT, CONNECT_TRANSACTION_ID as f64)
        .with_object(AmfValue::Object(obj));

    if let Some(auth) = link.auth.as_deref().filter(|_| link.flags.auth) {
        cmd = cmd.with_arg(true).with_arg(auth);
    }
    cmd.arguments.extend(link.extras.iter().cloned());
    cmd
}

pub fn create_stream(transaction_id: u32) -> Command {
    Command::new(CMD_CREATE_STREAM, transaction_id as f64)
}

pub fn release_stream(transaction_id: u32, playpath: &str) -> Command {
    Command::new(CMD_RELEASE_STREAM, transaction_id as f64).with_arg(playpath)
}

pub fn fc_publish(transaction_id: u32, playpath: &str) -> Command {
    Command::new(CMD_FC_PUBLISH, transaction_id as f64).with_arg(playpath)
}

pub fn fc_unpublish(transaction_id: u32, playpath: &str) -> Command {
    Command::new(CMD_FC_UNPUBLISH, transaction_id as f64).with_arg(playpath)
}

pub fn fc_subscribe(transaction_id: u32, path: &str) -> Command {
    Command::new(CMD_FC_SUBSCRIBE, transaction_id as f64).with_arg(path)
}

/// `set_playlist` with a single entry
pub fn set_playlist(stream_id: u32, playpath: &str) -> Command {
    let entries = AmfObject::new().with("0", playpath);
    Command::new(CMD_SET_PLAYLIST, 0.0)
        .with_arg(AmfValue::EcmaArray(entries))
        .with_stream(stream_id)
}

/// `play name start [duration]`
///
/// Live streams start at -1000. Otherwise playback starts at the seek time,
/// and a stop time turns into a duration relative to it.
pub fn play(link: &LinkConfig, transaction_id: u32, stream_id: u32, start_ms: u32) -> Command {
    let start = if link.flags.live {
        -1000.0
    } else {
        start_ms as f64
    };

    let mut cmd = Command::new(CMD_PLAY, transaction_id as f64)
        .with_arg(link.playpath.as_str())
        .with_arg(start)
        .with_stream(stream_id);

    if link.stop_ms > start_ms {
        cmd = cmd.with_arg((link.stop_ms - start_ms) as f64);
    }
    cmd
}

pub fn publish(transaction_id: u32, stream_id: u32, playpath: &str) -> Command {
    Command::new(CMD_PUBLISH, transaction_id as f64)
        .with_arg(playpath)
        .with_arg("live")
        .with_stream(stream_id)
}

pub fn pause(transaction_id: u32, stream_id: u32, paused: bool, timestamp_ms: u32) -> Command {
    Command::new(CMD_PAUSE, transaction_id as f64)
        .with_arg(paused)
        .with_arg(timestamp_ms as f64)
        .with_stream(stream_id)
}

pub fn seek(transaction_id: u32, stream_id: u32, timestamp_ms: u32) -> Command {
    Command::new(CMD_SEEK, transaction_id as f64)
        .with_arg(timestamp_ms as f64)
        .with_stream(stream_id)
}

/// `deleteStream`, sent on the connection stream
pub fn delete_stream(transaction_id: u32, stream_id: u32) -> Command {
    Command::new(CMD_DELETE_STREAM, transaction_id as f64).with_arg(stream_id as f64)
}

pub fn check_bw(transaction_id: u32) -> Command {
    Command::new(CMD_CHECK_BW, transaction_id as f64)
}

/// Reply to the server's `_onbwcheck` call
pub fn bw_check_result(transaction_id: f64, counter: u32) -> Command {
    Command::new(CMD_RESULT, transaction_id).with_arg(counter as f64)
}

/// `@setDataFrame onMetaData {...}`
pub fn set_data_frame(stream_id: u32, metadata: AmfValue) -> DataMessage {
    DataMessage {
        name: CMD_SET_DATA_FRAME.to_string(),
        values: vec![AmfValue::from(CMD_ON_METADATA), metadata],
        stream_id,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::config::ClientConfig;

    fn link_with(f: impl FnOnce(&mut ClientConfig)) -> LinkConfig {
        let mut config = ClientConfig::new("rtmp://localhost/live/stream1");
        f(&mut config);
        LinkConfig::from_config(&config).unwrap()
    }

    #[test]
    fn test_connect_object() {
        let link = link_with(|c| c.page_url = Some("http://example.com/".into()));
        let cmd = connect(&link);

        assert_eq!(cmd.name, CMD_CONNECT);
        assert_eq!(cmd.transaction_id, 1.0);
        let obj = &cmd.command_object;
        assert_eq!(obj.get_string("app"), Some("live"));
        assert_eq!(obj.get_string("tcUrl"), Some("rtmp://localhost:1935/live"));
        assert_eq!(obj.get_string("flashVer"), Some(DEFAULT_FLASH_VER));
        assert_eq!(obj.get_string("pageUrl"), Some("http://example.com/"));
        assert_eq!(obj.get_number("capabilities"), Some(15.0));
        assert!(obj.get("type").is_none());
        assert!(obj.get("swfUrl").is_none());
        assert!(cmd.arguments.is_empty());

        let names: Vec<String> = obj
            .as_object()
            .unwrap()
            .iter()
            .map(|(k, _)| k.to_string())
            .collect();
        assert_eq!(names.first().map(String::as_str), Some("app"));
        assert_eq!(names.last().map(String::as_str), Some("objectEncoding"));
    }

    #[test]
    fn test_connect_for_publishing() {
        let link = link_with(|c| c.publish = true);
        let cmd = connect(&link);
        assert_eq!(cmd.command_object.get_string("type"), Some("nonprivate"));
        assert!(cmd.command_object.get("fpad").is_none());
    }

    #[test]
    fn test_connect_auth_and_extras() {
        let link = link_with(|c| {
            c.auth = Some("secret".into());
            c.extras.push(AmfValue::Number(7.0));
        });
        let cmd = connect(&link);
        assert_eq!(
            cmd.arguments,
            vec![
                AmfValue::Boolean(true),
                AmfValue::from("secret"),
                AmfValue::Number(7.0)
            ]
        );
    }

    #[test]
    fn test_play_arguments() {
        let live = link_with(|c| c.live = true);
        let cmd = play(&live, 4, 1, 0);
        assert_eq!(cmd.stream_id, 1);
        assert_eq!(cmd.arguments, vec![AmfValue::from("stream1"), AmfValue::Number(-1000.0)]);

        let vod = link_with(|c| {
            c.seek_ms = 10_000;
            c.stop_ms = 25_000;
        });
        let cmd = play(&vod, 4, 1, vod.seek_ms);
        assert_eq!(
            cmd.arguments,
            vec![
                AmfValue::from("stream1"),
                AmfValue::Number(10_000.0),
                AmfValue::Number(15_000.0)
            ]
        );
    }

    #[test]
    fn test_stream_commands() {
        let cmd = pause(5, 1, true, 4200);
        assert_eq!(cmd.arguments, vec![AmfValue::Boolean(true), AmfValue::Number(4200.0)]);
        assert_eq!(cmd.stream_id, 1);

        let cmd = delete_stream(6, 1);
        assert_eq!(cmd.stream_id, 0);
        assert_eq!(cmd.arguments, vec![AmfValue::Number(1.0)]);

        let cmd = set_playlist(1, "stream1");
        assert_eq!(cmd.arguments[0].get_string("0"), Some("stream1"));

        let data = set_data_frame(1, AmfValue::EcmaArray(AmfObject::new().with("width", 640.0)));
        assert_eq!(data.values[0].as_str(), Some(CMD_ON_METADATA));
    }
}
