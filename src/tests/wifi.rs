use crate::error::{CommandError, Error};
use crate::manager::ModuleState;
use crate::scanner::TerminalCode;
use crate::tests::mock::{joined_manager, test_config, SimulatedModule, ASSIGNED_IP};
use crate::wifi::{IpConfiguration, IpMode, Security};
use core::net::Ipv4Addr;
use core::str::FromStr;

fn static_configuration() -> IpConfiguration {
    IpConfiguration {
        address: Ipv4Addr::new(10, 0, 0, 2),
        mask: Ipv4Addr::new(255, 255, 255, 0),
        gateway: Ipv4Addr::new(10, 0, 0, 1),
    }
}

#[test]
fn test_connect_dhcp() {
    let module = SimulatedModule::new();
    let manager = module.dual_manager(test_config());
    manager.open().unwrap();
    module.clear_commands();

    let configuration = manager
        .connect_ap("test_wifi", "secret", Security::Wpa2, IpMode::Dhcp)
        .unwrap();
    assert_eq!(Ipv4Addr::from_str(ASSIGNED_IP).unwrap(), configuration.address);
    assert_eq!(Ipv4Addr::new(192, 168, 1, 1), configuration.gateway);
    assert!(manager.is_joined());

    assert_eq!(
        vec!["AT+NDHCP=1", "AT+WAWPA=\"test_wifi\",2,\"secret\"", "AT+NSET?"],
        module.commands()
    );
}

#[test]
fn test_connect_dhcp_address_polling() {
    let module = SimulatedModule::new();
    let manager = module.dual_manager(test_config());
    manager.open().unwrap();
    module.set_pending_address_polls(2);

    let start = module.clock.now_ms();
    manager
        .connect_ap("test_wifi", "secret", Security::Wpa, IpMode::Dhcp)
        .unwrap();

    assert_eq!(3, module.count_commands("AT+NSET?"));
    assert!(module.clock.now_ms() - start >= 2 * 2_500);
}

#[test]
fn test_connect_dhcp_no_address() {
    let module = SimulatedModule::new();
    let manager = module.dual_manager(test_config());
    manager.open().unwrap();
    module.set_pending_address_polls(10);
    module.clear_commands();

    assert_eq!(
        Err(Error::ModuleCommError(CommandError::UnexpectedResponse)),
        manager.connect_ap("test_wifi", "secret", Security::Wpa2, IpMode::Dhcp)
    );
    assert_eq!(5, module.count_commands("AT+NSET?"));
    assert_eq!(1, module.count_commands("AT+WD"));
    assert_eq!(ModuleState::Connected, manager.state());
}

#[test]
fn test_connect_static() {
    let module = SimulatedModule::new();
    let manager = module.dual_manager(test_config());
    manager.open().unwrap();
    module.clear_commands();

    let configuration = manager
        .connect_ap("test_wifi", "secret", Security::Wpa2, IpMode::Static(static_configuration()))
        .unwrap();
    assert_eq!(static_configuration(), configuration);

    assert_eq!(
        vec![
            "AT+NDHCP=0",
            "AT+NSET=\"10.0.0.2\",\"255.255.255.0\",\"10.0.0.1\"",
            "AT+WAWPA=\"test_wifi\",2,\"secret\"",
        ],
        module.commands()
    );
}

#[test]
fn test_connect_retries_join() {
    let module = SimulatedModule::new();
    let manager = module.dual_manager(test_config());
    manager.open().unwrap();
    module.set_join_failures(2);
    module.clear_commands();

    manager
        .connect_ap("test_wifi", "secret", Security::Wpa2, IpMode::Dhcp)
        .unwrap();
    assert_eq!(3, module.count_commands("AT+WAWPA"));
    assert_eq!(2, module.count_commands("AT+WD"));
}

#[test]
fn test_connect_join_failed() {
    let module = SimulatedModule::new();
    let manager = module.dual_manager(test_config());
    manager.open().unwrap();
    module.set_join_failures(5);

    assert_eq!(
        Err(Error::ModuleCommError(CommandError::Terminal(TerminalCode::Error))),
        manager.connect_ap("test_wifi", "secret", Security::Wpa2, IpMode::Dhcp)
    );
    assert_eq!(ModuleState::Connected, manager.state());
    assert!(!manager.is_joined());
}

#[test]
fn test_connect_bad_parameters() {
    let module = SimulatedModule::new();
    let manager = module.dual_manager(test_config());

    assert_eq!(
        Err(Error::NotOpen),
        manager.connect_ap("test_wifi", "secret", Security::Wpa2, IpMode::Dhcp)
    );

    manager.open().unwrap();
    module.clear_commands();

    assert_eq!(
        Err(Error::BadParameter),
        manager.connect_ap("test_wifi", "secret", Security::Open, IpMode::Dhcp)
    );
    assert_eq!(
        Err(Error::BadParameter),
        manager.connect_ap("test_wifi", "secret", Security::Wep, IpMode::Dhcp)
    );
    assert_eq!(
        Err(Error::BadParameter),
        manager.connect_ap("test_wifi", &"x".repeat(64), Security::Wpa2, IpMode::Dhcp)
    );
    assert_eq!(
        Err(Error::BadParameter),
        manager.connect_ap(&"x".repeat(33), "secret", Security::Wpa2, IpMode::Dhcp)
    );

    let unspecified = IpConfiguration {
        address: Ipv4Addr::UNSPECIFIED,
        ..static_configuration()
    };
    assert_eq!(
        Err(Error::BadParameter),
        manager.connect_ap("test_wifi", "secret", Security::Wpa2, IpMode::Static(unspecified))
    );

    assert!(module.commands().is_empty());
}

#[test]
fn test_connect_already_joined() {
    let module = SimulatedModule::new();
    let manager = joined_manager(&module);

    assert_eq!(
        Err(Error::BadParameter),
        manager.connect_ap("test_wifi", "secret", Security::Wpa2, IpMode::Dhcp)
    );
}

#[test]
fn test_disconnect() {
    let module = SimulatedModule::new();
    let manager = joined_manager(&module);

    manager.disconnect().unwrap();
    assert_eq!(ModuleState::Connected, manager.state());
    assert_eq!(vec!["AT+WD", "AT+USTATRST"], module.commands());

    // Not joined anymore
    module.clear_commands();
    manager.disconnect().unwrap();
    assert!(module.commands().is_empty());
}

#[test]
fn test_get_ip_address() {
    let module = SimulatedModule::new();
    let manager = joined_manager(&module);

    let configuration = manager.get_ip_address().unwrap();
    assert_eq!(Ipv4Addr::from_str(ASSIGNED_IP).unwrap(), configuration.address);
    assert_eq!(Ipv4Addr::new(255, 255, 255, 0), configuration.mask);
}

#[test]
fn test_get_mac_address() {
    let module = SimulatedModule::new();
    let manager = module.dual_manager(test_config());
    manager.open().unwrap();

    assert_eq!("00:11:22:33:44:55", manager.get_mac_address().unwrap().as_str());
}

#[test]
fn test_get_mac_address_unexpected_response() {
    let module = SimulatedModule::new();
    let manager = module.dual_manager(test_config());
    manager.open().unwrap();
    module.script("AT+W", "SSID:test_wifi\r\nOK");

    assert_eq!(
        Err(Error::ModuleCommError(CommandError::UnexpectedResponse)),
        manager.get_mac_address()
    );
}

#[test]
fn test_set_dns_servers() {
    let module = SimulatedModule::new();
    let manager = module.dual_manager(test_config());
    manager.open().unwrap();
    module.clear_commands();

    manager
        .set_dns_servers(Ipv4Addr::new(8, 8, 8, 8), Some(Ipv4Addr::new(1, 1, 1, 1)))
        .unwrap();
    assert_eq!(vec!["AT+NDNSSVR=1,\"8.8.8.8\"", "AT+NDNSSVR=2,\"1.1.1.1\""], module.commands());

    assert_eq!(Err(Error::BadParameter), manager.set_dns_servers(Ipv4Addr::UNSPECIFIED, None));
}

#[test]
fn test_get_dns_servers() {
    let module = SimulatedModule::new();
    let manager = module.dual_manager(test_config());
    manager.open().unwrap();

    manager
        .set_dns_servers(Ipv4Addr::new(8, 8, 8, 8), Some(Ipv4Addr::new(1, 1, 1, 1)))
        .unwrap();
    module.clear_commands();

    assert_eq!(
        Ok((Ipv4Addr::new(8, 8, 8, 8), Some(Ipv4Addr::new(1, 1, 1, 1)))),
        manager.get_dns_servers()
    );
    assert_eq!(vec!["AT+NDNSSVR?"], module.commands());
}

#[test]
fn test_get_dns_servers_primary_only() {
    let module = SimulatedModule::new();
    let manager = module.dual_manager(test_config());
    manager.open().unwrap();

    assert_eq!(Ok((Ipv4Addr::UNSPECIFIED, None)), manager.get_dns_servers());

    manager.set_dns_servers(Ipv4Addr::new(8, 8, 4, 4), None).unwrap();
    assert_eq!(Ok((Ipv4Addr::new(8, 8, 4, 4), None)), manager.get_dns_servers());
}

#[test]
fn test_get_dns_servers_errors() {
    let module = SimulatedModule::new();
    let manager = module.dual_manager(test_config());
    assert_eq!(Err(Error::NotOpen), manager.get_dns_servers());

    manager.open().unwrap();
    module.script("AT+NDNSSVR?", "ERROR");
    assert_eq!(
        Err(Error::ModuleCommError(CommandError::Terminal(TerminalCode::Error))),
        manager.get_dns_servers()
    );

    module.script("AT+NDNSSVR?", "+NDNSSVR:1\r\nnot an address\r\nOK");
    assert_eq!(
        Err(Error::ModuleCommError(CommandError::UnexpectedResponse)),
        manager.get_dns_servers()
    );
}

#[test]
fn test_scan() {
    let module = SimulatedModule::new();
    let manager = module.dual_manager(test_config());
    manager.open().unwrap();

    let results = manager.scan().unwrap();
    assert_eq!(2, results.len());

    assert_eq!("test_wifi", results[0].ssid.as_str());
    assert_eq!("00:11:22:33:44:66", results[0].bssid.as_str());
    assert_eq!(6, results[0].channel);
    assert_eq!(-45, results[0].rssi);
    assert_eq!(Security::Wpa2, results[0].security);

    assert_eq!("open_wifi", results[1].ssid.as_str());
    assert_eq!(11, results[1].channel);
    assert_eq!(-70, results[1].rssi);
    assert_eq!(Security::Open, results[1].security);
}

#[test]
fn test_dns_query() {
    let module = SimulatedModule::new();
    let manager = joined_manager(&module);

    assert_eq!(Ok(Ipv4Addr::new(93, 184, 216, 34)), manager.dns_query("example.org"));
    assert_eq!(
        Err(Error::ModuleCommError(CommandError::UnexpectedResponse)),
        manager.dns_query("unknown.org")
    );
    assert_eq!(Err(Error::BadParameter), manager.dns_query(""));
}

#[test]
fn test_dns_query_not_joined() {
    let module = SimulatedModule::new();
    let manager = module.dual_manager(test_config());
    manager.open().unwrap();

    assert_eq!(Err(Error::NotJoined), manager.dns_query("example.org"));
}

#[test]
fn test_ping() {
    let module = SimulatedModule::new();
    let manager = joined_manager(&module);
    let remote = Ipv4Addr::new(93, 184, 216, 34);

    let start = module.clock.now_ms();
    assert_eq!(Ok(3), manager.ping(remote, 3, 1_000));
    assert!(module.clock.now_ms() - start >= 2_000);

    module.set_ping_failures(2);
    assert_eq!(Ok(1), manager.ping(remote, 3, 1_000));
}

#[test]
fn test_ping_failed() {
    let module = SimulatedModule::new();
    let manager = joined_manager(&module);
    module.set_ping_failures(2);

    assert_eq!(
        Err(Error::ModuleCommError(CommandError::Terminal(TerminalCode::Error))),
        manager.ping(Ipv4Addr::new(10, 0, 0, 1), 2, 100)
    );
    assert_eq!(Err(Error::BadParameter), manager.ping(Ipv4Addr::new(10, 0, 0, 1), 0, 100));
    assert_eq!(Err(Error::BadParameter), manager.ping(Ipv4Addr::UNSPECIFIED, 1, 100));
}

#[cfg(feature = "defmt")]
#[test]
fn test_ip_types_implement_format() {
    fn assert_format<T: defmt::Format>() {}

    assert_format::<IpConfiguration>();
    assert_format::<IpMode>();
}
