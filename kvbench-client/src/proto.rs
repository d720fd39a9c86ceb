//! The protobuf messages and gRPC stubs of the store's `etcdserverpb` API.
//!
//! This module just exposes the code generated from `proto/rpc.proto`. The clients back
//! [`GrpcStore`](crate::GrpcStore); the server traits let tests stand up a fake store.
#![allow(missing_docs)]
#![allow(missing_debug_implementations)]

tonic::include_proto!("etcdserverpb");

#[cfg(test)]
mod tests {
    use bytes::Bytes;
    use prost::Message;

    use super::*;

    #[test]
    fn put_request_wire_format() {
        let request = PutRequest {
            key: Bytes::from_static(b"foo"),
            value: Bytes::from_static(b"bar"),
            ..Default::default()
        };

        // field 1 (len 3) "foo", field 2 (len 3) "bar"
        assert_eq!(
            request.encode_to_vec(),
            b"\x0a\x03foo\x12\x03bar".to_vec()
        );
    }

    #[test]
    fn watch_response_skips_unknown_fields() {
        let response = WatchResponse {
            created: true,
            events: vec![Event {
                r#type: event::EventType::Delete as i32,
                kv: Some(KeyValue {
                    key: Bytes::from_static(b"foo"),
                    mod_revision: 9,
                    ..Default::default()
                }),
                prev_kv: None,
            }],
            ..Default::default()
        };
        let mut bytes = response.encode_to_vec();
        // an unknown varint field 15 appended by a newer server
        bytes.extend_from_slice(&[0x78, 0x01]);

        let decoded = WatchResponse::decode(bytes.as_slice()).unwrap();
        assert_eq!(decoded, response);
        assert_eq!(decoded.events[0].r#type(), event::EventType::Delete);
    }
}
