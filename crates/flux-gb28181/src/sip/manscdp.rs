// GB28181 MANSCDP 消息
// 解析平台下发的查询，生成心跳 / 目录 / 设备信息 / 设备状态 XML

use super::identity::DeviceIdentity;
use crate::error::{GbError, Result};
use chrono::{DateTime, Local};
use quick_xml::de::from_str;
use quick_xml::escape::escape;
use serde::Deserialize;

pub const CONTENT_TYPE: &str = "Application/MANSCDP+xml";

const XML_DECL: &str = r#"<?xml version="1.0" encoding="GB2312"?>"#;

/// GB28181 XML 消息根节点（Query / Response / Notify 共用）
#[derive(Debug, Deserialize, PartialEq)]
#[serde(rename_all = "PascalCase")]
pub struct ManscdpMessage {
    pub cmd_type: String,

    #[serde(rename = "SN", default)]
    pub sn: Option<u32>,

    #[serde(rename = "DeviceID", default)]
    pub device_id: String,

    #[serde(default)]
    pub sum_num: Option<u32>,

    #[serde(default)]
    pub device_list: Option<DeviceList>,

    #[serde(rename = "DeviceName", default)]
    pub device_name: String,

    #[serde(default)]
    pub result: String,

    #[serde(rename = "Online", default)]
    pub online_status: String,

    #[serde(rename = "Status", default)]
    pub device_status: String,

    #[serde(rename = "Channel", default)]
    pub channel: Option<u32>,
}

/// 设备列表
#[derive(Debug, Deserialize, PartialEq)]
#[serde(rename_all = "PascalCase")]
pub struct DeviceList {
    #[serde(rename = "@Num", default)]
    pub num: Option<u32>,

    #[serde(rename = "Item", default)]
    pub items: Vec<DeviceItem>,
}

/// 目录项（通道）
#[derive(Debug, Deserialize, Clone, PartialEq)]
#[serde(rename_all = "PascalCase")]
pub struct DeviceItem {
    #[serde(rename = "DeviceID")]
    pub device_id: String,

    #[serde(default)]
    pub name: String,

    #[serde(rename = "ParentID", default)]
    pub parent_id: String,

    #[serde(default)]
    pub civil_code: String,

    #[serde(default)]
    pub status: String,
}

/// 本设备能应答的命令
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ManscdpCommand {
    Keepalive,
    DeviceInfo,
    DeviceStatus,
    Catalog,
}

impl ManscdpCommand {
    pub fn from_cmd_type(cmd_type: &str) -> Option<Self> {
        match cmd_type.trim() {
            "Keepalive" => Some(Self::Keepalive),
            "DeviceInfo" => Some(Self::DeviceInfo),
            "DeviceStatus" => Some(Self::DeviceStatus),
            "Catalog" => Some(Self::Catalog),
            _ => None,
        }
    }
}

impl ManscdpMessage {
    pub fn command(&self) -> Option<ManscdpCommand> {
        ManscdpCommand::from_cmd_type(&self.cmd_type)
    }
}

/// 解析 GB28181 XML 消息
pub fn parse(xml: &str) -> Result<ManscdpMessage> {
    from_str(xml.trim()).map_err(|e| GbError::Xml(format!("Failed to parse MANSCDP XML: {}", e)))
}

/// 心跳通知
pub fn keepalive(sn: u32, device_id: &str) -> String {
    format!(
        "{}\r\n<Notify>\r\n<CmdType>Keepalive</CmdType>\r\n<SN>{}</SN>\r\n<DeviceID>{}</DeviceID>\r\n<Status>OK</Status>\r\n</Notify>\r\n",
        XML_DECL,
        sn,
        escape(device_id)
    )
}

/// 目录应答：列出全部通道，状态固定 ON
pub fn catalog_response(sn: u32, device: &DeviceIdentity) -> String {
    let mut xml = format!(
        "{}\r\n<Response>\r\n<CmdType>Catalog</CmdType>\r\n<SN>{}</SN>\r\n<DeviceID>{}</DeviceID>\r\n<SumNum>{}</SumNum>\r\n<DeviceList Num=\"{}\">\r\n",
        XML_DECL,
        sn,
        escape(&device.id),
        device.channels.len(),
        device.channels.len()
    );

    for channel in &device.channels {
        xml.push_str(&format!(
            "<Item>\r\n<DeviceID>{}</DeviceID>\r\n<Name>{}</Name>\r\n<Manufacturer>{}</Manufacturer>\r\n<Model>{}</Model>\r\n<Owner>Owner</Owner>\r\n<CivilCode>{}</CivilCode>\r\n<Address>Address</Address>\r\n<Parental>0</Parental>\r\n<ParentID>{}</ParentID>\r\n<SafetyWay>0</SafetyWay>\r\n<RegisterWay>1</RegisterWay>\r\n<Secrecy>0</Secrecy>\r\n<Status>ON</Status>\r\n</Item>\r\n",
            escape(&channel.id),
            escape(&channel.name),
            escape(&device.manufacturer),
            escape(&device.model),
            escape(device.civil_code()),
            escape(&device.id),
        ));
    }

    xml.push_str("</DeviceList>\r\n</Response>\r\n");
    xml
}

/// 设备信息应答
pub fn device_info_response(sn: u32, device: &DeviceIdentity) -> String {
    format!(
        "{}\r\n<Response>\r\n<CmdType>DeviceInfo</CmdType>\r\n<SN>{}</SN>\r\n<DeviceID>{}</DeviceID>\r\n<DeviceName>{}</DeviceName>\r\n<Result>OK</Result>\r\n<Manufacturer>{}</Manufacturer>\r\n<Model>{}</Model>\r\n<Firmware>{}</Firmware>\r\n<Channel>{}</Channel>\r\n</Response>\r\n",
        XML_DECL,
        sn,
        escape(&device.id),
        escape(&device.name),
        escape(&device.manufacturer),
        escape(&device.model),
        escape(&device.firmware),
        device.channels.len()
    )
}

/// 设备状态应答：在线、工作正常
pub fn device_status_response(sn: u32, device_id: &str, now: DateTime<Local>) -> String {
    format!(
        "{}\r\n<Response>\r\n<CmdType>DeviceStatus</CmdType>\r\n<SN>{}</SN>\r\n<DeviceID>{}</DeviceID>\r\n<Result>OK</Result>\r\n<Online>ONLINE</Online>\r\n<Status>OK</Status>\r\n<Encode>ON</Encode>\r\n<Record>OFF</Record>\r\n<DeviceTime>{}</DeviceTime>\r\n<Alarmstatus Num=\"0\">\r\n</Alarmstatus>\r\n</Response>\r\n",
        XML_DECL,
        sn,
        escape(device_id),
        now.format("%Y-%m-%dT%H:%M:%S")
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sip::identity::ChannelInfo;

    fn device() -> DeviceIdentity {
        DeviceIdentity::new("34020000001320000001", "3402000000", "127.0.0.1", 5060).with_channels(vec![
            ChannelInfo {
                id: "34020000001310000001".to_string(),
                name: "前门 & 车厢".to_string(),
                logical_channel: 1,
            },
            ChannelInfo {
                id: "34020000001310000002".to_string(),
                name: "后门".to_string(),
                logical_channel: 2,
            },
        ])
    }

    #[test]
    fn test_parse_query() {
        let xml = r#"<?xml version="1.0" encoding="GB2312"?>
<Query>
<CmdType>Catalog</CmdType>
<SN>17430</SN>
<DeviceID>34020000001320000001</DeviceID>
</Query>"#;

        let msg = parse(xml).unwrap();
        assert_eq!(msg.command(), Some(ManscdpCommand::Catalog));
        assert_eq!(msg.sn, Some(17430));
        assert_eq!(msg.device_id, "34020000001320000001");
    }

    #[test]
    fn test_unknown_command() {
        let xml = "<Query><CmdType>RecordInfo</CmdType><SN>1</SN><DeviceID>x</DeviceID></Query>";
        assert_eq!(parse(xml).unwrap().command(), None);
        assert!(parse("<Query><SN>1</SN>").is_err());
    }

    #[test]
    fn test_catalog_response_lists_channels() {
        let xml = catalog_response(9, &device());
        let msg = parse(&xml).unwrap();

        assert_eq!(msg.cmd_type, "Catalog");
        assert_eq!(msg.sn, Some(9));
        assert_eq!(msg.sum_num, Some(2));

        let list = msg.device_list.unwrap();
        assert_eq!(list.num, Some(2));
        assert_eq!(list.items.len(), 2);
        assert_eq!(list.items[0].name, "前门 & 车厢");
        assert_eq!(list.items[0].parent_id, "34020000001320000001");
        assert_eq!(list.items[0].civil_code, "340200");
        assert_eq!(list.items[1].status, "ON");
    }

    #[test]
    fn test_device_info_response() {
        let msg = parse(&device_info_response(3, &device())).unwrap();
        assert_eq!(msg.command(), Some(ManscdpCommand::DeviceInfo));
        assert_eq!(msg.device_name, "JT1078 Gateway");
        assert_eq!(msg.result, "OK");
        assert_eq!(msg.channel, Some(2));
    }

    #[test]
    fn test_device_status_response() {
        let xml = device_status_response(4, "34020000001320000001", Local::now());
        let msg = parse(&xml).unwrap();
        assert_eq!(msg.command(), Some(ManscdpCommand::DeviceStatus));
        assert_eq!(msg.online_status, "ONLINE");
        assert_eq!(msg.device_status, "OK");
        assert!(xml.contains("<DeviceTime>"));
    }

    #[test]
    fn test_keepalive() {
        let msg = parse(&keepalive(42, "34020000001320000001")).unwrap();
        assert_eq!(msg.command(), Some(ManscdpCommand::Keepalive));
        assert_eq!(msg.sn, Some(42));
        assert_eq!(msg.device_status, "OK");
    }
}
