//! The seeded template database (§4.1) covers the well-known profiles a
//! fresh gateway ships with, independent of any BLE object tracker state.

use gwcore::gdb::Gdb;
use gwcore::ident::Uuid;

fn uuid16(v: u16) -> Uuid {
    Uuid::from_u16(v)
}

#[test]
fn seed_registers_device_information_service() {
    let mut gdb = Gdb::new();
    gdb.seed();
    let tmpl = gdb.lookup_template(uuid16(0x180a)).expect("device information service");
    assert_eq!(tmpl.key, "device_info");
}

#[test]
fn seed_registers_battery_level_property() {
    let mut gdb = Gdb::new();
    gdb.seed();
    let props = gdb.lookup_props(uuid16(0x2a19));
    assert!(props.iter().any(|p| p.name == "level" || p.name.contains("batt")));
}

#[test]
fn unmanaged_characteristic_yields_empty_props_not_an_error() {
    let mut gdb = Gdb::new();
    gdb.seed();
    let props = gdb.lookup_props(uuid16(0xdead));
    assert!(props.is_empty());
}

#[test]
fn seeding_twice_on_fresh_instances_is_independent() {
    let mut a = Gdb::new();
    let mut b = Gdb::new();
    a.seed();
    b.seed();
    assert_eq!(a.lookup_template(uuid16(0x180a)).unwrap().key, b.lookup_template(uuid16(0x180a)).unwrap().key);
}
