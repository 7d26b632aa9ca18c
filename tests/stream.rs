use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use bytes::Bytes;
use chrono::Utc;
use webrtc::rtp::packet::Packet;

use livepath::{
    AccessRequest, PathEntity, Payload, PathManager, ReaderDelivery, Unit, Writer,
};

mod common;
use common::*;

fn h264_packet(seq: u16, payload: &[u8]) -> Packet {
    let mut pkt = Packet::default();
    pkt.header.version = 2;
    pkt.header.marker = true;
    pkt.header.payload_type = 96;
    pkt.header.sequence_number = seq;
    pkt.header.timestamp = u32::from(seq) * 3000;
    pkt.payload = Bytes::copy_from_slice(payload);
    pkt
}

/// End-to-end padding scrub: a publisher writes a packet with the padding
/// bit set, an RTP reader receives it with the bit cleared and the payload
/// byte-identical.
#[tokio::test]
async fn test_padding_bit_scrubbed_on_the_way_through() {
    let manager =
        PathManager::new(single_path_conf(publisher_conf("cam1")), None).unwrap();

    let publisher = TestPublisher::new("p1");
    let path = manager
        .add_publisher(
            AccessRequest::publish("cam1", localhost(), "rtsp"),
            publisher.clone(),
        )
        .await
        .unwrap();
    let stream = path
        .start_publisher(publisher.id(), vec![h264_media()], false)
        .await
        .unwrap();

    let reader = TestReader::new("r1");
    let (path, reader_stream) = manager
        .add_reader(AccessRequest::read("cam1", localhost(), "rtsp"), reader.clone())
        .await
        .unwrap();

    let received = Arc::new(Mutex::new(Vec::<Packet>::new()));
    let sink = received.clone();
    reader_stream
        .add_reader(
            reader.identify(),
            0,
            96,
            ReaderDelivery::RtpPackets,
            Arc::new(move |unit| {
                sink.lock().unwrap().extend(unit.rtp_packets.iter().cloned());
            }),
        )
        .unwrap();
    path.reader_play(reader.id()).await.unwrap();

    let mut pkt = h264_packet(1, &[0x65, 0xDE, 0xAD, 0xBE, 0xEF]);
    pkt.header.padding = true;
    stream.write_rtp_packet(0, 96, pkt, Utc::now()).unwrap();

    let received = received.lock().unwrap();
    assert_eq!(received.len(), 1);
    assert!(!received[0].header.padding);
    assert_eq!(received[0].payload.as_ref(), &[0x65, 0xDE, 0xAD, 0xBE, 0xEF]);
    manager.close();
}

/// Back-pressure locality: reader B's sink blocks forever and its queue
/// overflows; reader A keeps receiving every packet, in order.
#[tokio::test]
async fn test_slow_reader_loses_packets_without_affecting_others() {
    let manager =
        PathManager::new(single_path_conf(publisher_conf("cam1")), None).unwrap();

    let publisher = TestPublisher::new("p1");
    let path = manager
        .add_publisher(
            AccessRequest::publish("cam1", localhost(), "rtsp"),
            publisher.clone(),
        )
        .await
        .unwrap();
    let stream = path
        .start_publisher(publisher.id(), vec![h264_media()], false)
        .await
        .unwrap();

    const QUEUE_SIZE: usize = 512;
    const PACKETS: usize = 600;

    let writer_a = Writer::new(QUEUE_SIZE, "reader-a");
    let writer_b = Writer::new(QUEUE_SIZE, "reader-b");

    let seen_a = Arc::new(Mutex::new(Vec::<u16>::new()));
    let queued_b = Arc::new(AtomicUsize::new(0));

    {
        let sender = writer_a.sender();
        let seen_a = seen_a.clone();
        stream
            .add_reader(
                livepath::EntityInfo::new("testReader", "a"),
                0,
                96,
                ReaderDelivery::RtpPackets,
                Arc::new(move |unit: Arc<Unit>| {
                    let seen_a = seen_a.clone();
                    sender.push(Box::pin(async move {
                        seen_a
                            .lock()
                            .unwrap()
                            .push(unit.rtp_packets[0].header.sequence_number);
                        Ok(())
                    }));
                }),
            )
            .unwrap();
    }
    {
        let sender = writer_b.sender();
        let queued_b = queued_b.clone();
        stream
            .add_reader(
                livepath::EntityInfo::new("testReader", "b"),
                0,
                96,
                ReaderDelivery::RtpPackets,
                Arc::new(move |_unit: Arc<Unit>| {
                    let queued_b = queued_b.clone();
                    sender.push(Box::pin(async move {
                        queued_b.fetch_add(1, Ordering::SeqCst);
                        // Block this consumer forever.
                        std::future::pending::<()>().await;
                        Ok(())
                    }));
                }),
            )
            .unwrap();
    }

    for seq in 0..PACKETS as u16 {
        stream
            .write_rtp_packet(0, 96, h264_packet(seq, &[0x41, 0x01]), Utc::now())
            .unwrap();
        // Let the consumers run between writes, as a paced publisher would.
        tokio::task::yield_now().await;
    }
    tokio::time::sleep(Duration::from_millis(300)).await;

    let seen_a = seen_a.lock().unwrap();
    assert_eq!(seen_a.len(), PACKETS);
    assert!(seen_a.windows(2).all(|w| w[0] < w[1]));

    // B consumed one task (the blocking one); at most QUEUE_SIZE more are
    // parked in its queue; the rest were dropped at push time, without ever
    // slowing down A or the publisher.
    assert_eq!(queued_b.load(Ordering::SeqCst), 1);

    writer_a.close();
    writer_b.close();
    manager.close();
}

/// Two decoded readers (WebRTC-style and HLS-style) observe the same NAL
/// unit sequence: parameters prepended before the IDR, delimiter removed;
/// audio flows through untouched.
#[tokio::test]
async fn test_decoded_readers_see_identical_remuxed_sequences() {
    let manager =
        PathManager::new(single_path_conf(publisher_conf("cam1")), None).unwrap();

    let publisher = TestPublisher::new("p1");
    let path = manager
        .add_publisher(
            AccessRequest::publish("cam1", localhost(), "rtsp"),
            publisher.clone(),
        )
        .await
        .unwrap();
    let stream = path
        .start_publisher(publisher.id(), vec![h264_media(), aac_media()], false)
        .await
        .unwrap();

    let collect_video = |bucket: Arc<Mutex<Vec<Vec<Bytes>>>>| -> livepath::UnitFn {
        Arc::new(move |unit: Arc<Unit>| {
            if let Payload::H264(nalus) = &unit.payload {
                if !nalus.is_empty() {
                    bucket.lock().unwrap().push(nalus.clone());
                }
            }
        })
    };
    let webrtc_video = Arc::new(Mutex::new(Vec::new()));
    let hls_video = Arc::new(Mutex::new(Vec::new()));
    stream
        .add_reader(
            livepath::EntityInfo::new("webRTCSession", "w1"),
            0,
            96,
            ReaderDelivery::DecodedUnits,
            collect_video(webrtc_video.clone()),
        )
        .unwrap();
    stream
        .add_reader(
            livepath::EntityInfo::new("hlsMuxer", "h1"),
            0,
            96,
            ReaderDelivery::DecodedUnits,
            collect_video(hls_video.clone()),
        )
        .unwrap();

    let audio_seen = Arc::new(Mutex::new(Vec::<Bytes>::new()));
    {
        let audio_seen = audio_seen.clone();
        stream
            .add_reader(
                livepath::EntityInfo::new("webRTCSession", "w1"),
                1,
                97,
                ReaderDelivery::DecodedUnits,
                Arc::new(move |unit: Arc<Unit>| {
                    if let Payload::Mpeg4Audio(aus) = &unit.payload {
                        audio_seen.lock().unwrap().extend(aus.iter().cloned());
                    }
                }),
            )
            .unwrap();
    }

    // Video: an access-unit delimiter followed by an IDR.
    stream
        .write_rtp_packet(0, 96, h264_packet(1, &[0x09, 0xF0]), Utc::now())
        .unwrap();
    stream
        .write_rtp_packet(0, 96, h264_packet(2, &[0x65, 0x88, 0x40]), Utc::now())
        .unwrap();

    // Audio: one access unit, RFC 3640 framing.
    let au = [0xDE, 0xAD, 0xFA, 0xCE];
    let mut aac_payload = vec![0x00, 0x10];
    aac_payload.extend_from_slice(&((au.len() as u16) << 3).to_be_bytes());
    aac_payload.extend_from_slice(&au);
    let mut aac_pkt = Packet::default();
    aac_pkt.header.version = 2;
    aac_pkt.header.marker = true;
    aac_pkt.header.payload_type = 97;
    aac_pkt.payload = Bytes::from(aac_payload);
    stream.write_rtp_packet(1, 97, aac_pkt, Utc::now()).unwrap();

    let webrtc_video = webrtc_video.lock().unwrap();
    let hls_video = hls_video.lock().unwrap();
    assert_eq!(*webrtc_video, *hls_video);
    assert_eq!(webrtc_video.len(), 1);
    let nalus = &webrtc_video[0];
    assert_eq!(nalus.len(), 3);
    assert_eq!(nalus[0][0] & 0x1F, 7);
    assert_eq!(nalus[1][0] & 0x1F, 8);
    assert_eq!(nalus[2].as_ref(), &[0x65, 0x88, 0x40]);

    let audio_seen = audio_seen.lock().unwrap();
    assert_eq!(audio_seen.len(), 1);
    assert_eq!(audio_seen[0].as_ref(), &au);
    manager.close();
}

/// A reader subscribed at time T receives everything written after T and
/// nothing after unsubscribing.
#[tokio::test]
async fn test_subscription_window_is_exact() {
    let manager =
        PathManager::new(single_path_conf(publisher_conf("cam1")), None).unwrap();
    let publisher = TestPublisher::new("p1");
    let path = manager
        .add_publisher(
            AccessRequest::publish("cam1", localhost(), "rtsp"),
            publisher.clone(),
        )
        .await
        .unwrap();
    let stream = path
        .start_publisher(publisher.id(), vec![h264_media()], false)
        .await
        .unwrap();

    let seen = Arc::new(Mutex::new(Vec::<u16>::new()));
    let sink = seen.clone();

    stream
        .write_rtp_packet(0, 96, h264_packet(0, &[0x41, 0x01]), Utc::now())
        .unwrap();

    stream
        .add_reader(
            livepath::EntityInfo::new("testReader", "r1"),
            0,
            96,
            ReaderDelivery::RtpPackets,
            Arc::new(move |unit: Arc<Unit>| {
                sink.lock()
                    .unwrap()
                    .push(unit.rtp_packets[0].header.sequence_number);
            }),
        )
        .unwrap();
    for seq in 1..=5u16 {
        stream
            .write_rtp_packet(0, 96, h264_packet(seq, &[0x41, 0x01]), Utc::now())
            .unwrap();
    }
    stream.remove_reader("r1");
    stream
        .write_rtp_packet(0, 96, h264_packet(6, &[0x41, 0x01]), Utc::now())
        .unwrap();

    assert_eq!(*seen.lock().unwrap(), vec![1, 2, 3, 4, 5]);
    manager.close();
}
