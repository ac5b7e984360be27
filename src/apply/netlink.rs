// rtnetlink backend: link lookup, rule and route creation over NETLINK_ROUTE

use super::{BackendError, LinkHandle, LinkKind, RouteRequest, RoutingBackend, RuleRequest};
use crate::error::{AppError, AppResult};
use crate::routes::NetworkPrefix;
use netlink_packet_core::{
    NLM_F_ACK, NLM_F_CREATE, NLM_F_EXCL, NLM_F_REQUEST, NetlinkHeader, NetlinkMessage,
    NetlinkPayload,
};
use netlink_packet_route::link::{InfoKind, LinkAttribute, LinkInfo, LinkMessage};
use netlink_packet_route::route::{
    RouteAddress, RouteAttribute, RouteMessage, RouteProtocol, RouteScope, RouteType,
};
use netlink_packet_route::rule::{RuleAction, RuleAttribute, RuleMessage};
use netlink_packet_route::{AddressFamily, RouteNetlinkMessage};
use netlink_sys::{Socket, SocketAddr, protocols::NETLINK_ROUTE};
use std::net::IpAddr;
use tracing::{debug, trace};

const RT_TABLE_UNSPEC: u8 = 0;
const RT_TABLE_MAIN: u8 = 254;

/// errno returned by RTM_GETLINK for an unknown name
const ENODEV: i32 = 19;

const RECV_BUFFER_SIZE: usize = 32 * 1024;

pub struct NetlinkBackend {
    socket: Socket,
    buffer: Vec<u8>,
    sequence: u32,
}

impl NetlinkBackend {
    pub fn new() -> AppResult<Self> {
        let mut socket = Socket::new(NETLINK_ROUTE)
            .map_err(|e| AppError::Netlink(format!("Failed to create socket: {}", e)))?;
        socket
            .bind_auto()
            .map_err(|e| AppError::Netlink(format!("Failed to bind socket: {}", e)))?;
        socket
            .connect(&SocketAddr::new(0, 0))
            .map_err(|e| AppError::Netlink(format!("Failed to connect socket: {}", e)))?;

        debug!("netlink route socket ready");

        Ok(NetlinkBackend {
            socket,
            buffer: Vec::with_capacity(RECV_BUFFER_SIZE),
            sequence: 0,
        })
    }

    /// Send one request with NLM_F_ACK and collect replies until the ack
    fn request(
        &mut self,
        payload: RouteNetlinkMessage,
        flags: u16,
    ) -> Result<Vec<RouteNetlinkMessage>, BackendError> {
        self.sequence = self.sequence.wrapping_add(1);
        let seq = self.sequence;

        let header = request_header(seq, flags);
        let mut packet = NetlinkMessage::new(header, NetlinkPayload::InnerMessage(payload));
        packet.finalize();

        let mut buf = vec![0u8; packet.buffer_len()];
        packet.serialize(&mut buf);

        trace!(seq, len = buf.len(), "sending netlink request");
        self.socket.send(&buf, 0)?;

        let mut replies = Vec::new();
        loop {
            self.buffer.clear();
            let len = self.socket.recv(&mut self.buffer, 0)?;

            let mut offset = 0;
            while offset < len {
                let msg = NetlinkMessage::<RouteNetlinkMessage>::deserialize(
                    &self.buffer[offset..len],
                )
                .map_err(|e| BackendError::Protocol(format!("Failed to parse reply: {}", e)))?;

                let msg_len = msg.header.length as usize;
                if msg_len == 0 {
                    return Err(BackendError::Protocol("zero-length reply".to_string()));
                }
                // netlink messages are 4-byte aligned
                offset += (msg_len + 3) & !3;

                if msg.header.sequence_number != seq {
                    trace!(seq = msg.header.sequence_number, "skipping unrelated reply");
                    continue;
                }

                match msg.payload {
                    NetlinkPayload::Error(err) => {
                        return match err.code {
                            None => Ok(replies),
                            Some(code) => Err(kernel_error(code.get())),
                        };
                    }
                    NetlinkPayload::Done(_) => return Ok(replies),
                    NetlinkPayload::InnerMessage(inner) => replies.push(inner),
                    _ => {}
                }
            }
        }
    }
}

/// Header for a request that expects an ack; `flags` adds to REQUEST | ACK
fn request_header(seq: u32, flags: u16) -> NetlinkHeader {
    let mut header = NetlinkHeader::default();
    header.flags = NLM_F_REQUEST | NLM_F_ACK | flags;
    header.sequence_number = seq;
    header
}

fn kernel_error(code: i32) -> BackendError {
    let errno = code.checked_neg().unwrap_or(code);
    if errno == ENODEV {
        BackendError::NotFound
    } else {
        BackendError::Kernel(std::io::Error::from_raw_os_error(errno))
    }
}

impl RoutingBackend for NetlinkBackend {
    fn resolve_link(&mut self, name: &str) -> Result<LinkHandle, BackendError> {
        let mut msg = LinkMessage::default();
        msg.attributes.push(LinkAttribute::IfName(name.to_string()));

        let replies = self.request(RouteNetlinkMessage::GetLink(msg), 0)?;

        replies
            .into_iter()
            .find_map(|reply| match reply {
                RouteNetlinkMessage::NewLink(link) => Some(link_handle(name, &link)),
                _ => None,
            })
            .ok_or(BackendError::NotFound)
    }

    fn add_rule(&mut self, rule: &RuleRequest) -> Result<(), BackendError> {
        let msg = build_rule_message(rule)?;
        self.request(RouteNetlinkMessage::NewRule(msg), NLM_F_CREATE | NLM_F_EXCL)?;
        Ok(())
    }

    fn add_route(&mut self, route: &RouteRequest) -> Result<(), BackendError> {
        let msg = build_route_message(route)?;
        self.request(RouteNetlinkMessage::NewRoute(msg), NLM_F_CREATE | NLM_F_EXCL)?;
        Ok(())
    }
}

fn link_handle(name: &str, link: &LinkMessage) -> LinkHandle {
    let kind = link
        .attributes
        .iter()
        .find_map(|attr| match attr {
            LinkAttribute::LinkInfo(infos) => infos.iter().find_map(|info| match info {
                LinkInfo::Kind(kind) => Some(kind_name(kind)),
                _ => None,
            }),
            _ => None,
        })
        .map_or(LinkKind::Device, LinkKind::Other);

    LinkHandle {
        name: name.to_string(),
        index: link.header.index,
        kind,
    }
}

fn kind_name(kind: &InfoKind) -> String {
    match kind {
        InfoKind::Other(name) => name.clone(),
        other => format!("{:?}", other).to_lowercase(),
    }
}

fn family_of(addr: IpAddr) -> AddressFamily {
    match addr {
        IpAddr::V4(_) => AddressFamily::Inet,
        IpAddr::V6(_) => AddressFamily::Inet6,
    }
}

fn route_address(addr: IpAddr) -> RouteAddress {
    match addr {
        IpAddr::V4(v4) => RouteAddress::Inet(v4),
        IpAddr::V6(v6) => RouteAddress::Inet6(v6),
    }
}

fn rule_family(rule: &RuleRequest) -> Result<AddressFamily, BackendError> {
    match (rule.source, rule.destination) {
        (Some(src), Some(dst)) if src.is_ipv4() != dst.is_ipv4() => Err(BackendError::Protocol(
            format!("source {} and destination {} differ in address family", src, dst),
        )),
        (Some(prefix), _) | (None, Some(prefix)) => Ok(family_of(prefix.addr())),
        (None, None) => Ok(AddressFamily::Inet),
    }
}

pub(crate) fn build_rule_message(rule: &RuleRequest) -> Result<RuleMessage, BackendError> {
    let mut msg = RuleMessage::default();
    msg.header.family = rule_family(rule)?;
    msg.header.action = RuleAction::ToTable;

    if rule.table < 256 {
        msg.header.table = rule.table as u8;
    } else {
        msg.header.table = RT_TABLE_UNSPEC;
    }
    if rule.table != 0 {
        msg.attributes.push(RuleAttribute::Table(rule.table));
    }

    if let Some(src) = &rule.source {
        msg.header.src_len = src.prefix_len();
        msg.attributes.push(RuleAttribute::Source(src.addr()));
    }
    if let Some(dst) = &rule.destination {
        msg.header.dst_len = dst.prefix_len();
        msg.attributes.push(RuleAttribute::Destination(dst.addr()));
    }
    if let Some(priority) = rule.priority {
        msg.attributes.push(RuleAttribute::Priority(priority));
    }

    Ok(msg)
}

pub(crate) fn build_route_message(route: &RouteRequest) -> Result<RouteMessage, BackendError> {
    let dst: &NetworkPrefix = &route.destination;
    if dst.is_ipv4() != route.gateway.is_ipv4() {
        return Err(BackendError::Protocol(format!(
            "gateway {} is not in the address family of {}",
            route.gateway, dst
        )));
    }

    let mut msg = RouteMessage::default();
    msg.header.address_family = family_of(dst.addr());
    msg.header.destination_prefix_length = dst.prefix_len();
    msg.header.protocol = RouteProtocol::Boot;
    msg.header.scope = RouteScope::Universe;
    msg.header.kind = RouteType::Unicast;

    match route.table {
        0 => msg.header.table = RT_TABLE_MAIN,
        t if t < 256 => msg.header.table = t as u8,
        t => {
            msg.header.table = RT_TABLE_UNSPEC;
            msg.attributes.push(RouteAttribute::Table(t));
        }
    }

    msg.attributes
        .push(RouteAttribute::Destination(route_address(dst.addr())));
    msg.attributes
        .push(RouteAttribute::Gateway(route_address(route.gateway)));
    msg.attributes.push(RouteAttribute::Priority(route.priority));
    msg.attributes.push(RouteAttribute::Oif(route.link_index));

    Ok(msg)
}
