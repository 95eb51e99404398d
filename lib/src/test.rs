// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

#[cfg(test)]
mod test {

    use crate::error::{Action, Error};
    use crate::fakes::FakeSession;
    use crate::frame::ManagedSystem;
    use crate::hmc::Hmc;
    use crate::lpar::{CpuRange, CreateOptions, CreateSettings, Lpar, MemRange, NetBootOptions};
    use crate::partition::{Partition, PowerOffOptions, PowerState};
    use crate::util::PollPolicy;
    use anyhow::Result;
    use slog::Logger;
    use std::collections::BTreeMap;
    use std::sync::Arc;
    use std::time::Duration;

    const FAST_POLL: PollPolicy = PollPolicy::new(3, Duration::ZERO);

    const LPAR1_PROFILE: &str = "name=normal,lpar_name=lpar1,lpar_id=3,\
        \"virtual_scsi_adapters=20/client/1/vios1/12/1,21/client/2/vios2/13/1\",\
        \"virtual_fc_adapters=\"\"30/client/1/vios1/14/c050760848060000,c050760848060001/1\"\"\"";

    fn log() -> Logger {
        Logger::root(slog::Discard, slog::o!())
    }

    /// A managed system `sys1` with VIO servers `vios1` (id 1) and `vios2`
    /// (id 2) and a defined partition `lpar1` (id 3) holding one vSCSI adapter
    /// on each VIO server and one virtual fibre channel adapter on `vios1`.
    ///
    /// Rules are matched in insertion order, so `script` runs first to let a
    /// test override any of the standard answers.
    fn fixture(script: impl FnOnce(&FakeSession)) -> (FakeSession, Arc<ManagedSystem>) {
        let fake = FakeSession::new();
        script(&fake);

        fake.respond("lssyscfg -r sys", "name=sys1,type_model=9117-MMD,state=Operating");
        fake.respond("grep vioserver", "vioserver,1,vios1\nvioserver,2,vios2");
        for (name, id) in [("vios1", 1), ("vios2", 2)] {
            fake.respond(
                &format!("lssyscfg -r lpar -m sys1 --filter \"lpar_names={name}\""),
                &format!(
                    "name={name},lpar_id={id},lpar_env=vioserver,curr_profile=default,default_profile=default"
                ),
            );
            fake.respond(
                &format!("lssyscfg -r prof -m sys1 --filter \"lpar_names={name}\""),
                &format!("name=default,lpar_name={name},lpar_id={id}"),
            );
        }
        // identical patterns share a queue, so keep this one distinct from
        // the partition list scripted by define_lpar2
        fake.respond("-m sys1 -F name", "vios1\nvios2\nlpar1");
        fake.respond(
            "lssyscfg -r lpar -m sys1 --filter \"lpar_names=lpar1\"",
            "name=lpar1,lpar_id=3,lpar_env=aixlinux,curr_profile=,default_profile=normal",
        );
        fake.respond("lssyscfg -r prof -m sys1 --filter \"lpar_names=lpar1\"", LPAR1_PROFILE);

        fake.respond(
            "--id 1 -c \"lsdev -slots\"",
            "U8233.E8B.10ABCDE-V1-C12  Virtual I/O Slot  vhost0\n\
             U8233.E8B.10ABCDE-V1-C14  Virtual I/O Slot  vfchost0",
        );
        fake.respond(
            "--id 2 -c \"lsdev -slots\"",
            "U8233.E8B.10ABCDE-V2-C13  Virtual I/O Slot  vhost1",
        );
        fake.respond(
            "--id 1 -c \"chkdev",
            "hdisk4:3E2136 17B4302181234567890ABCDEFGHIJ:00f6db0a6c7a9b1c:vtscsi0",
        );
        fake.respond("lsmap -vadapter vhost0 -field", "hdisk4:vtscsi0:0x8100000000000000");
        fake.respond("lspv -size hdisk4", "51200");
        fake.respond(
            "lshwres --rsubtype vnetwork",
            "vnetwork=VLAN1-ETHERNET0,is_tagged=0,vswitch=ETHERNET0,vlan_id=1",
        );

        let hmc = Arc::new(Hmc::with_session("hmc01", fake.boxed(), &log()).unwrap());
        let frame = Arc::new(ManagedSystem::new(hmc, "sys1").unwrap());
        (fake, frame)
    }

    /// Answers for a partition `lpar2` (id 4) that only exists once
    /// `mksyscfg` has run.
    fn define_lpar2(fake: &FakeSession) {
        fake.respond("lssyscfg -r lpar -m sys1 -F name", "vios1\nvios2\nlpar1")
            .respond("lssyscfg -r lpar -m sys1 -F name", "vios1\nvios2\nlpar1\nlpar2");
        fake.respond(
            "lssyscfg -r lpar -m sys1 --filter \"lpar_names=lpar2\"",
            "name=lpar2,lpar_id=4,lpar_env=aixlinux,curr_profile=,default_profile=normal",
        );
        fake.respond(
            "lssyscfg -r prof -m sys1 --filter \"lpar_names=lpar2\"",
            "name=normal,lpar_name=lpar2,lpar_id=4,\
             \"virtual_scsi_adapters=20/client/1/vios1/12/1,21/client/2/vios2/13/1\"",
        );
    }

    fn settings() -> CreateSettings {
        CreateSettings {
            profile_name: "normal".into(),
            mem: MemRange { min: 2048, desired: 8192, max: 16384 },
            mem_expansion: 0.0,
            proc_mode: "shared".into(),
            cpu: CpuRange {
                min_vp: 1,
                desired_vp: 2,
                max_vp: 4,
                min_units: 0.1,
                desired_units: 0.5,
                max_units: 2.0,
            },
            sharing_mode: "uncap".into(),
            uncap_weight: 128,
            max_virtual_slots: 100,
            virtual_eth_adapters: None,
            virtual_scsi_adapters: Some("20/client/1/vios1/12/1,21/client/2/vios2/13/1".into()),
            virtual_fc_adapters: None,
        }
    }

    #[test]
    fn frame_discovers_vioservers() -> Result<()> {
        let (fake, frame) = fixture(|_| {});
        let ids: Vec<u32> = frame.vioservers().iter().map(|v| v.id()).collect();
        assert_eq!(ids, vec![1, 2]);
        assert_eq!(frame.vioserver(2).map(|v| v.name().to_string()), Some("vios2".into()));
        assert!(frame.vioserver(7).is_none());
        assert!(matches!(frame.require_vioserver(7), Err(Error::UnknownVios(7))));

        assert!(frame.lpar_exists("lpar1")?);
        assert!(!frame.lpar_exists("lpar9")?);
        assert_eq!(fake.count("-F name"), 2);
        Ok(())
    }

    #[test]
    fn unknown_frame_is_not_found() {
        let fake = FakeSession::new();
        fake.respond("lssyscfg -r sys", "name=sys1,state=Operating");
        let hmc = Arc::new(Hmc::with_session("hmc01", fake.boxed(), &log()).unwrap());
        assert!(matches!(ManagedSystem::new(hmc, "sys9"), Err(Error::NotFound(_))));
        assert_eq!(fake.count("grep vioserver"), 0);
    }

    #[test]
    fn hscl_vios_listing_is_a_command_error() {
        let fake = FakeSession::new();
        fake.respond("lssyscfg -r sys", "name=sys1,state=Operating");
        fake.respond("grep vioserver", "HSCL8012 The managed system was not found");
        let hmc = Arc::new(Hmc::with_session("hmc01", fake.boxed(), &log()).unwrap());
        assert!(ManagedSystem::new(hmc, "sys1").unwrap_err().is_command());
    }

    #[test]
    fn networks_are_cached() -> Result<()> {
        let (fake, frame) = fixture(|_| {});
        assert_eq!(frame.networks()?.len(), 1);
        assert_eq!(frame.networks()?[0].vswitch, "ETHERNET0");
        assert_eq!(fake.count("lshwres --rsubtype vnetwork"), 1);
        Ok(())
    }

    #[test]
    fn topology_renders() -> Result<()> {
        let (_fake, frame) = fixture(|_| {});
        let ron = frame.topology_ron()?;
        assert!(ron.contains("frame: \"sys1\""));
        assert!(ron.contains("\"lpar1\""));
        assert!(ron.contains("vlan_id: 1"));
        Ok(())
    }

    #[test]
    fn lpar_selects_default_profile() -> Result<()> {
        let (_fake, frame) = fixture(|_| {});
        let lpar = Lpar::new(frame, "lpar1")?;
        let identity = lpar.identity()?;
        assert_eq!(identity.id, 3);
        assert_eq!(identity.profile_name(), "normal");
        assert_eq!(identity.profiles.len(), 1);
        Ok(())
    }

    #[test]
    fn missing_profile_is_an_error() {
        let (_fake, frame) = fixture(|fake| {
            fake.respond(
                "lssyscfg -r lpar -m sys1 --filter \"lpar_names=lpar1\"",
                "name=lpar1,lpar_id=3,curr_profile=gone,default_profile=normal",
            );
        });
        assert!(matches!(Lpar::new(frame, "lpar1"), Err(Error::NotFound(_))));
    }

    #[test]
    fn state_is_queried_every_time() -> Result<()> {
        let (fake, frame) = fixture(|fake| {
            fake.respond("-F state --filter lpar_names=lpar1", "Running");
        });
        let lpar = Lpar::new(frame, "lpar1")?;
        assert_eq!(lpar.state()?, PowerState::Running);
        assert_eq!(lpar.state()?, PowerState::Running);
        assert_eq!(fake.count("-F state --filter lpar_names=lpar1"), 2);
        assert_eq!(fake.count("chsysstate"), 0);
        Ok(())
    }

    #[test]
    fn power_on_requires_not_activated() -> Result<()> {
        let (fake, frame) = fixture(|fake| {
            fake.respond("-F state --filter lpar_names=lpar1", "Running");
        });
        let lpar = Lpar::new(frame, "lpar1")?;
        match lpar.power_on() {
            Err(Error::PowerState { expected, actual, subject }) => {
                assert_eq!(expected, "Not Activated");
                assert_eq!(actual, PowerState::Running);
                assert_eq!(subject, "lpar1");
            }
            other => panic!("expected power state error, got {other:?}"),
        }
        assert_eq!(fake.count("chsysstate"), 0);
        Ok(())
    }

    #[test]
    fn power_off_requires_activated() -> Result<()> {
        let (fake, frame) = fixture(|fake| {
            fake.respond("-F state --filter lpar_names=lpar1", "Not Activated");
        });
        let lpar = Lpar::new(frame, "lpar1")?;
        match lpar.power_off(PowerOffOptions::default()) {
            Err(Error::PowerState { expected, actual, .. }) => {
                assert_eq!(expected, "activated");
                assert_eq!(actual, PowerState::NotActivated);
            }
            other => panic!("expected power state error, got {other:?}"),
        }
        assert_eq!(fake.count("chsysstate"), 0);
        Ok(())
    }

    #[test]
    fn power_commands() -> Result<()> {
        let (fake, frame) = fixture(|fake| {
            fake.respond("-F state --filter lpar_names=lpar1", "Not Activated")
                .respond("-F state --filter lpar_names=lpar1", "Open Firmware");
        });
        let lpar = Lpar::new(frame, "lpar1")?;
        lpar.power_on()?;
        lpar.power_off(PowerOffOptions { os: true, immediate: true, restart: true })?;

        let commands: Vec<String> =
            fake.commands().into_iter().filter(|c| c.starts_with("chsysstate")).collect();
        assert_eq!(
            commands,
            vec![
                "chsysstate -m sys1 --id 3 -o on -r lpar -f normal",
                "chsysstate -m sys1 --id 3 -o osshutdown -r lpar --restart --immed",
            ]
        );
        Ok(())
    }

    #[test]
    fn power_command_failure_is_reported() -> Result<()> {
        let (_fake, frame) = fixture(|fake| {
            fake.respond("-F state --filter lpar_names=lpar1", "Not Activated");
            fake.respond("chsysstate", "HSCL0DB4 The partition is not capable");
        });
        let lpar = Lpar::new(frame, "lpar1")?;
        assert!(lpar.power_on().unwrap_err().is_command());
        Ok(())
    }

    #[test]
    fn save_profile_command() -> Result<()> {
        let (fake, frame) = fixture(|_| {});
        frame.require_vioserver(1)?.save_profile()?;
        assert_eq!(
            fake.commands().last().map(String::as_str),
            Some(
                "mksyscfg -r prof -m sys1 -o save --id 1 -n \
                 $(lssyscfg -r lpar -m sys1 --filter \\\"lpar_ids=1\\\" -F curr_profile) --force"
            )
        );
        Ok(())
    }

    #[test]
    fn adapters_resolve_against_vioservers() -> Result<()> {
        let (fake, frame) = fixture(|_| {});
        let lpar = Lpar::new(frame, "lpar1")?;

        let scsi = lpar.vscsi_adapters()?;
        assert_eq!(scsi.len(), 2);
        assert_eq!(scsi[0].mapping.device.as_deref(), Some("vhost0"));
        assert_eq!(scsi[0].storage.len(), 1);
        assert_eq!(scsi[0].storage[0].vtd, "vtscsi0");
        assert_eq!(scsi[0].storage[0].size, "51200");
        assert_eq!(scsi[1].mapping.vios_id, 2);
        assert_eq!(scsi[1].mapping.device.as_deref(), Some("vhost1"));
        assert!(scsi[1].storage.is_empty());

        let fc = lpar.vfc_adapters()?;
        assert_eq!(fc.len(), 1);
        assert_eq!(fc[0].mapping.device.as_deref(), Some("vfchost0"));
        assert!(fc[0].mapping.wwns.is_some());
        assert!(fc[0].npiv.is_none());

        let mut expected = BTreeMap::new();
        expected.insert(1, vec![(12, Some("vhost0".to_string())), (14, Some("vfchost0".to_string()))]);
        expected.insert(2, vec![(13, Some("vhost1".to_string()))]);
        assert_eq!(lpar.adapter_names()?, expected);

        // one slot listing per vio server
        assert_eq!(fake.count("lsdev -slots"), 2);
        Ok(())
    }

    #[test]
    fn delete_tears_down_adapters() -> Result<()> {
        let (fake, frame) = fixture(|fake| {
            fake.respond("-F state --filter lpar_names=lpar1", "Not Activated");
        });
        let lpar = Lpar::new(frame, "lpar1")?;
        lpar.delete()?;

        assert_eq!(fake.count("rmvdev -vtd vtscsi0"), 1);
        assert_eq!(fake.count("rmvdev"), 1);
        assert_eq!(fake.count("rmdev -dev"), 3);
        assert_eq!(fake.count("chhwres"), 3);
        assert_eq!(fake.count("-o save"), 2);
        assert_eq!(fake.count("cfgdev -dev vio0"), 2);
        assert_eq!(fake.count("rmsyscfg -r lpar -m sys1 -n lpar1"), 1);

        let commands = fake.commands();
        assert!(commands.contains(
            &"chhwres -m sys1 -r virtualio -o r --id 1 --rsubtype scsi -s 12".to_string()
        ));
        assert!(commands.contains(
            &"chhwres -m sys1 -r virtualio -o r --id 2 --rsubtype scsi -s 13".to_string()
        ));
        assert!(commands.contains(
            &"chhwres -m sys1 -r virtualio -o r --id 1 --rsubtype fc -s 14".to_string()
        ));

        assert!(matches!(lpar.state(), Err(Error::UseAfterDestroy(_))));
        assert!(matches!(lpar.delete(), Err(Error::UseAfterDestroy(_))));
        assert!(matches!(lpar.refresh(), Err(Error::UseAfterDestroy(_))));
        Ok(())
    }

    #[test]
    fn delete_requires_not_activated() -> Result<()> {
        let (fake, frame) = fixture(|fake| {
            fake.respond("-F state --filter lpar_names=lpar1", "Running");
        });
        let lpar = Lpar::new(frame, "lpar1")?;
        assert!(matches!(lpar.delete(), Err(Error::PowerState { .. })));
        assert_eq!(fake.count("rmsyscfg"), 0);
        assert!(lpar.is_defined());
        Ok(())
    }

    #[test]
    fn create_needs_settings() -> Result<()> {
        let (fake, frame) = fixture(define_lpar2);
        let lpar = Lpar::new(frame, "lpar2")?;
        assert!(!lpar.is_defined());
        assert!(matches!(lpar.create(CreateOptions::default()), Err(Error::Configuration(_))));
        assert_eq!(fake.count("mksyscfg"), 0);
        Ok(())
    }

    #[test]
    fn create_test_mode_runs_nothing() -> Result<()> {
        let (fake, frame) = fixture(define_lpar2);
        let lpar = Lpar::new(frame, "lpar2")?;
        lpar.set_settings(settings());
        let before = fake.commands().len();
        lpar.create(CreateOptions { test: true, rollback_on_failure: true })?;
        assert_eq!(fake.commands().len(), before);
        Ok(())
    }

    #[test]
    fn create_provisions_and_cycles_power() -> Result<()> {
        let (fake, frame) = fixture(|fake| {
            fake.respond("-F state --filter lpar_names=lpar2", "Not Activated")
                .respond("-F state --filter lpar_names=lpar2", "Not Activated")
                .respond("-F state --filter lpar_names=lpar2", "Running");
            define_lpar2(fake);
        });
        let lpar = Lpar::new(frame, "lpar2")?.with_activation_policy(FAST_POLL);
        lpar.set_settings(settings());
        lpar.create(CreateOptions::default())?;

        assert!(lpar.is_defined());
        assert_eq!(lpar.id()?, 4);
        assert_eq!(fake.count("mksyscfg -m sys1 -r lpar -i \"name=lpar2,"), 1);
        assert_eq!(fake.count("-o save"), 2);
        assert_eq!(fake.count("cfgdev -dev vio0"), 2);

        let commands = fake.commands();
        assert!(commands.contains(
            &"chhwres -m sys1 -r virtualio -o a --id 1 --rsubtype scsi -s 12 \
              -a \"adapter_type=server,remote_lpar_name=lpar2,remote_slot_num=20\""
                .to_string()
        ));
        assert!(commands.contains(
            &"chhwres -m sys1 -r virtualio -o a --id 2 --rsubtype scsi -s 13 \
              -a \"adapter_type=server,remote_lpar_name=lpar2,remote_slot_num=21\""
                .to_string()
        ));
        let power: Vec<&String> = commands.iter().filter(|c| c.starts_with("chsysstate")).collect();
        assert_eq!(
            power,
            vec![
                "chsysstate -m sys1 --id 4 -o on -r lpar -f normal",
                "chsysstate -m sys1 --id 4 -o shutdown -r lpar --immed",
            ]
        );
        assert_eq!(fake.count("rmsyscfg"), 0);
        Ok(())
    }

    #[test]
    fn create_definition_failure_carries_action() -> Result<()> {
        let (fake, frame) = fixture(|fake| {
            fake.respond(
                "mksyscfg -m sys1 -r lpar",
                "HSCLA4C2 The format of the configuration data is invalid.",
            );
            define_lpar2(fake);
        });
        let lpar = Lpar::new(frame, "lpar2")?;
        lpar.set_settings(settings());
        match lpar.create(CreateOptions { test: false, rollback_on_failure: true }) {
            Err(Error::Command { action, command, .. }) => {
                assert_eq!(action, Some(Action::Create));
                assert!(command.is_some_and(|c| c.starts_with("mksyscfg")));
            }
            other => panic!("expected command error, got {other:?}"),
        }
        assert_eq!(fake.count("chhwres"), 0);
        assert_eq!(fake.count("rmsyscfg"), 0);
        Ok(())
    }

    #[test]
    fn create_rolls_back_when_asked() -> Result<()> {
        let (fake, frame) = fixture(|fake| {
            fake.respond("-o a --id 2", "The format of the configuration data is invalid.");
            fake.respond("-F state --filter lpar_names=lpar2", "Not Activated");
            define_lpar2(fake);
        });
        let lpar = Lpar::new(frame, "lpar2")?;
        lpar.set_settings(settings());
        let e = lpar
            .create(CreateOptions { test: false, rollback_on_failure: true })
            .unwrap_err();

        assert!(e.is_command());
        assert_eq!(fake.count("rmsyscfg -r lpar -m sys1 -n lpar2"), 1);
        assert!(matches!(lpar.state(), Err(Error::UseAfterDestroy(_))));
        Ok(())
    }

    #[test]
    fn create_keeps_partition_without_rollback() -> Result<()> {
        let (fake, frame) = fixture(|fake| {
            fake.respond("-o a --id 2", "The format of the configuration data is invalid.");
            define_lpar2(fake);
        });
        let lpar = Lpar::new(frame, "lpar2")?;
        lpar.set_settings(settings());
        assert!(lpar.create(CreateOptions::default()).unwrap_err().is_command());
        assert_eq!(fake.count("rmsyscfg"), 0);
        assert_eq!(fake.count("chhwres -m sys1 -r virtualio -o a"), 2);
        Ok(())
    }

    #[test]
    fn create_times_out_waiting_for_activation() -> Result<()> {
        let (fake, frame) = fixture(|fake| {
            fake.respond("-F state --filter lpar_names=lpar2", "Not Activated");
            define_lpar2(fake);
        });
        let lpar = Lpar::new(frame, "lpar2")?.with_activation_policy(FAST_POLL);
        lpar.set_settings(settings());
        match lpar.create(CreateOptions::default()) {
            Err(Error::Command { action, command, message }) => {
                assert_eq!(action, Some(Action::Startup));
                assert!(command.is_none());
                assert!(message.contains("timeout"));
            }
            other => panic!("expected startup error, got {other:?}"),
        }
        // power on check, first look, then one per poll attempt
        assert_eq!(fake.count("-F state --filter lpar_names=lpar2"), 5);
        assert_eq!(fake.count("-o shutdown"), 0);
        Ok(())
    }

    #[test]
    fn net_boot_needs_every_option() -> Result<()> {
        let (fake, frame) = fixture(|_| {});
        let lpar = Lpar::new(frame, "lpar1")?;
        let mut opts = NetBootOptions {
            ip: Some("10.1.0.20".into()),
            netmask: Some("255.255.255.0".into()),
            gateway: Some("10.1.0.1".into()),
            server: None,
        };
        assert!(matches!(lpar.net_boot(&opts), Err(Error::Configuration(_))));
        assert_eq!(fake.count("lpar_netboot"), 0);

        opts.server = Some("10.1.0.5".into());
        lpar.net_boot(&opts)?;
        assert_eq!(
            fake.commands().last().map(String::as_str),
            Some(
                "lpar_netboot -f -T off -t ent -s auto -d auto -D -K 255.255.255.0 \
                 -G 10.1.0.1 -S 10.1.0.5 -C 10.1.0.20 lpar1 normal sys1"
            )
        );
        Ok(())
    }

    #[test]
    fn create_refuses_a_defined_partition() -> Result<()> {
        let (fake, frame) = fixture(|fake| {
            fake.respond(
                "mksyscfg -m sys1 -r lpar",
                "HSCL3019 A partition with the name lpar1 already exists",
            );
            fake.respond("-o a --id 2", "The format of the configuration data is invalid.");
            fake.respond("-F state --filter lpar_names=lpar1", "Not Activated");
        });
        let lpar = Lpar::new(frame, "lpar1")?;
        lpar.set_settings(settings());
        assert!(matches!(
            lpar.create(CreateOptions { test: false, rollback_on_failure: true }),
            Err(Error::Configuration(_))
        ));
        for command in ["mksyscfg -m sys1 -r lpar", "chhwres", "rmvdev", "rmdev", "rmsyscfg"] {
            assert_eq!(fake.count(command), 0, "{command} was issued");
        }
        assert!(lpar.is_defined());
        Ok(())
    }

    #[test]
    fn create_adds_fibre_channel_adapters() -> Result<()> {
        let (fake, frame) = fixture(|fake| {
            fake.respond("-F state --filter lpar_names=lpar2", "Not Activated")
                .respond("-F state --filter lpar_names=lpar2", "Running");
            define_lpar2(fake);
        });
        let lpar = Lpar::new(frame, "lpar2")?.with_activation_policy(FAST_POLL);
        let mut s = settings();
        s.virtual_fc_adapters =
            Some("30/client/1/vios1/14/c050760848060000,c050760848060001/1".into());
        lpar.set_settings(s);
        lpar.create(CreateOptions::default())?;

        assert!(fake.commands().contains(
            &"chhwres -m sys1 -r virtualio -o a --id 1 --rsubtype fc -s 14 \
              -a \"adapter_type=server,remote_lpar_name=lpar2,remote_slot_num=30\""
                .to_string()
        ));
        assert_eq!(fake.count("chhwres -m sys1 -r virtualio -o a"), 3);
        // vios1 serves a scsi and a fibre channel adapter but syncs once
        assert_eq!(fake.count("-o save --id 1"), 1);
        assert_eq!(fake.count("-o save --id 2"), 1);
        assert_eq!(fake.count("--id 1 -c \"cfgdev -dev vio0\""), 1);
        Ok(())
    }

    #[test]
    fn delete_skips_npiv_state() -> Result<()> {
        let (fake, frame) = fixture(|fake| {
            fake.respond("-F state --filter lpar_names=lpar1", "Not Activated");
            fake.respond(
                "lsmap -vadapter vfchost0 -npiv",
                "HSCL2970 The IOServer command has failed because of the following reason: device busy",
            );
        });
        let lpar = Lpar::new(frame, "lpar1")?;
        lpar.delete()?;
        assert_eq!(fake.count("-npiv"), 0);
        assert_eq!(fake.count("chhwres"), 3);
        assert_eq!(fake.count("rmsyscfg -r lpar -m sys1 -n lpar1"), 1);
        Ok(())
    }

    #[test]
    fn delete_resolves_every_adapter_before_removing() -> Result<()> {
        let (fake, frame) = fixture(|fake| {
            fake.respond("-F state --filter lpar_names=lpar1", "Not Activated");
            fake.respond(
                "lssyscfg -r prof -m sys1 --filter \"lpar_names=lpar1\"",
                "name=normal,lpar_name=lpar1,lpar_id=3,\
                 \"virtual_scsi_adapters=20/client/1/vios1/12/1\",\
                 \"virtual_fc_adapters=\"\"30/client/7/vios7/14/c050760848060000,c050760848060001/1\"\"\"",
            );
        });
        let lpar = Lpar::new(frame, "lpar1")?;
        assert!(matches!(lpar.delete(), Err(Error::UnknownVios(7))));
        for command in ["rmvdev", "rmdev", "chhwres", "-o save", "rmsyscfg"] {
            assert_eq!(fake.count(command), 0, "{command} was issued");
        }
        assert!(lpar.is_defined());
        Ok(())
    }

    #[test]
    fn delete_stops_on_failed_hot_remove() -> Result<()> {
        let (fake, frame) = fixture(|fake| {
            fake.respond("-F state --filter lpar_names=lpar1", "Not Activated");
            fake.respond("-o r --id 2", "HSCL294D Dynamic remove of virtual I/O resources failed");
        });
        let lpar = Lpar::new(frame, "lpar1")?;
        match lpar.delete() {
            Err(Error::Command { command, .. }) => {
                assert!(command.is_some_and(|c| c.contains("-o r --id 2 --rsubtype scsi -s 13")));
            }
            other => panic!("expected command error, got {other:?}"),
        }
        assert_eq!(fake.count("rmsyscfg"), 0);
        assert_eq!(fake.count("-o save"), 0);
        assert!(lpar.is_defined());
        Ok(())
    }

    #[test]
    fn power_on_keeps_current_profile() -> Result<()> {
        let (fake, frame) = fixture(|fake| {
            fake.respond("-F state --filter lpar_names=vios1", "Not Activated");
        });
        frame.require_vioserver(1)?.power_on()?;
        let commands: Vec<String> =
            fake.commands().into_iter().filter(|c| c.starts_with("chsysstate")).collect();
        assert_eq!(commands, vec!["chsysstate -m sys1 --id 1 -o on -r lpar"]);
        Ok(())
    }

    #[test]
    fn lpar_names_are_checked() {
        let (_fake, frame) = fixture(|_| {});
        assert!(matches!(Lpar::new(frame, "lpar1; rm -rf /"), Err(Error::Configuration(_))));
    }
}
