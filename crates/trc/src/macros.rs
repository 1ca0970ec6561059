/*
 * SPDX-FileCopyrightText: 2020 Stalwart Labs LLC <hello@stalw.art>
 *
 * SPDX-License-Identifier: AGPL-3.0-only OR LicenseRef-SEL
 */

#[macro_export]
macro_rules! event {
    ($branch:ident($inner:expr) $(, $key:ident = $value:expr)* $(,)?) => {{
        let event_type = $crate::EventType::$branch($inner);
        if $crate::collector::Collector::has_interest(event_type) {
            $crate::collector::Collector::record(
                event_type,
                vec![$(($crate::Key::$key, $crate::Value::from($value))),*],
            );
        }
    }};
}

#[macro_export]
macro_rules! error {
    ($err:expr) => {{
        $crate::collector::Collector::record_error(&$err);
    }};
}

#[macro_export]
macro_rules! location {
    () => {
        concat!(file!(), ":", line!())
    };
}

#[macro_export]
macro_rules! bail {
    ($err:expr) => {
        return Err($err.into());
    };
}
