//! TCP segment crafting and reply parsing for half-open scans

use pnet::packet::ip::IpNextHeaderProtocols;
use pnet::packet::ipv4::Ipv4Packet;
use pnet::packet::tcp::{MutableTcpPacket, TcpFlags, TcpPacket};
use rand::Rng;
use std::net::Ipv4Addr;

pub const TCP_HEADER_LEN: usize = 20;

/// Builder for a bare TCP SYN segment.
///
/// The kernel prepends the IP header on an `IPPROTO_TCP` raw socket, so only
/// the TCP header is produced here; the checksum still covers the IPv4
/// pseudo-header.
pub struct SynPacketBuilder {
    source_ip: Ipv4Addr,
    dest_ip: Ipv4Addr,
    source_port: u16,
    dest_port: u16,
    seq_num: u32,
    window_size: u16,
}

impl SynPacketBuilder {
    pub fn new(source_ip: Ipv4Addr, dest_ip: Ipv4Addr, source_port: u16, dest_port: u16) -> Self {
        Self {
            source_ip,
            dest_ip,
            source_port,
            dest_port,
            seq_num: rand::thread_rng().gen(),
            window_size: 1024,
        }
    }

    pub fn seq_num(mut self, seq_num: u32) -> Self {
        self.seq_num = seq_num;
        self
    }

    pub fn window_size(mut self, window_size: u16) -> Self {
        self.window_size = window_size;
        self
    }

    pub fn build(self) -> Vec<u8> {
        let mut buf = vec![0u8; TCP_HEADER_LEN];
        if let Some(mut tcp) = MutableTcpPacket::new(&mut buf) {
            tcp.set_source(self.source_port);
            tcp.set_destination(self.dest_port);
            tcp.set_sequence(self.seq_num);
            tcp.set_acknowledgement(0);
            tcp.set_data_offset(5);
            tcp.set_flags(TcpFlags::SYN);
            tcp.set_window(self.window_size);
            tcp.set_urgent_ptr(0);
            let checksum =
                pnet::packet::tcp::ipv4_checksum(&tcp.to_immutable(), &self.source_ip, &self.dest_ip);
            tcp.set_checksum(checksum);
        }
        buf
    }
}

/// Answer to a SYN probe
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SynReply {
    SynAck,
    Reset,
}

/// Parse a datagram read from a raw TCP socket (IP header included).
///
/// Returns `None` for anything that is not an answer from `remote:remote_port`
/// to our `local_port`.
pub fn parse_syn_reply(
    packet: &[u8],
    remote: Ipv4Addr,
    remote_port: u16,
    local_port: u16,
) -> Option<SynReply> {
    let ip = Ipv4Packet::new(packet)?;
    if ip.get_next_level_protocol() != IpNextHeaderProtocols::Tcp || ip.get_source() != remote {
        return None;
    }

    let header_len = ip.get_header_length() as usize * 4;
    let tcp = TcpPacket::new(packet.get(header_len..)?)?;
    if tcp.get_source() != remote_port || tcp.get_destination() != local_port {
        return None;
    }

    let flags = tcp.get_flags();
    if flags & TcpFlags::RST != 0 {
        Some(SynReply::Reset)
    } else if flags & (TcpFlags::SYN | TcpFlags::ACK) == TcpFlags::SYN | TcpFlags::ACK {
        Some(SynReply::SynAck)
    } else {
        None
    }
}
